use chrono::{DateTime, TimeZone};
use regex::{Captures, Regex};
use std::sync::LazyLock;

const FALLBACK_TEMPLATE: &str = "{%srv%}_{%db%}_{%date%}";

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{%(\w+)%\}").expect("placeholder pattern is valid"));

/// Render a dump file name from `template`.
///
/// Supports `{%srv%}`, `{%db%}`, `{%date%}`, `{%time%}`, `{%datetime%}` and
/// `{%ts%}`. Unknown placeholders are kept verbatim; spaces become `_`.
pub fn dump_file_name<Tz>(template: &str, server: &str, database: &str, at: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let template = if template.trim().is_empty() {
        FALLBACK_TEMPLATE
    } else {
        template
    };

    let rendered = PLACEHOLDER.replace_all(template, |caps: &Captures| match &caps[1] {
        "srv" => server.to_string(),
        "db" => database.to_string(),
        "date" => at.format("%Y.%m.%d").to_string(),
        "time" => at.format("%H-%M-%S").to_string(),
        "datetime" => at.format("%Y.%m.%d_%H-%M-%S").to_string(),
        "ts" => at.timestamp().to_string(),
        _ => caps[0].to_string(),
    });

    file_safe(&rendered)
}

/// Make a rendered name usable as a file name: spaces become `_`.
pub fn file_safe(name: &str) -> String {
    name.replace(' ', "_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 7, 9, 5, 2).unwrap()
    }

    #[test]
    fn test_all_placeholders() {
        let name = dump_file_name(
            "{%srv%}-{%db%}-{%date%}-{%time%}-{%datetime%}-{%ts%}",
            "prod",
            "orders",
            &at(),
        );
        assert_eq!(
            name,
            "prod-orders-2024.03.07-09-05-02-2024.03.07_09-05-02-1709802302"
        );
    }

    #[test]
    fn test_empty_template_falls_back() {
        assert_eq!(dump_file_name("", "prod", "orders", &at()), "prod_orders_2024.03.07");
    }

    #[test]
    fn test_spaces_replaced_and_unknown_kept() {
        let name = dump_file_name("{%srv%} {%db%} {%env%}", "main box", "orders", &at());
        assert_eq!(name, "main_box_orders_{%env%}");
    }
}
