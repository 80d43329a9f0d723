/// 1) Trim whitespace + strip outer quotes if present.
pub fn clean_str(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2 {
        trimmed[1..trimmed.len() - 1].to_string()
    } else {
        trimmed.to_string()
    }
}

/// 2) Tolerant integer coercion for survey cells.
///
/// Blank or whitespace-only cells are `None`. Trailing DOS EOF markers,
/// underscores and spaces are dropped (`"49098____  "`), and integral floats
/// (`"12.0"`) are accepted.
pub fn parse_number(raw: &str) -> Option<i64> {
    let cleaned = clean_str(raw);
    let v = cleaned
        .trim_end_matches('\x1a')
        .trim_end_matches(|c| c == '_' || c == ' ');
    if v.is_empty() {
        return None;
    }
    v.parse::<i64>().ok().or_else(|| {
        v.parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(|f| f as i64)
    })
}

/// Capitalise the first letter of every alphabetic run and lowercase the rest.
/// Digits and punctuation break runs, so `PRINCE GEORGE'S` becomes
/// `Prince George'S` and `0TSEGO` becomes `0Tsego`.
pub fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_word = false;
    for c in s.chars() {
        if c.is_alphabetic() {
            if in_word {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            in_word = true;
        } else {
            out.push(c);
            in_word = false;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number(" 42 "), Some(42));
        assert_eq!(parse_number("   "), None);
        assert_eq!(parse_number(""), None);
        assert_eq!(parse_number("49098____  "), Some(49098));
        assert_eq!(parse_number("2019\x1a"), Some(2019));
        assert_eq!(parse_number("12.0"), Some(12));
        assert_eq!(parse_number("C"), None);
    }

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("PRINCE GEORGE'S COUNTY"), "Prince George'S County");
        assert_eq!(title_case("0TSEGO CO. PT UNINC. AREA"), "0Tsego Co. Pt Uninc. Area");
        assert_eq!(title_case("new york"), "New York");
    }
}
