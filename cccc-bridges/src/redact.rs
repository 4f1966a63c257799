//! PII redaction applied to outbound summaries before posting (spec
//! §4.11 "PII-redacted by configurable regexes").

use regex::Regex;

pub struct Redactor {
    rules: Vec<(Regex, String)>,
}

impl Redactor {
    pub fn new(rules: Vec<(Regex, String)>) -> Self {
        Redactor { rules }
    }

    /// Email addresses and phone-number-shaped digit runs, replaced with
    /// a tag naming what was redacted rather than dropped silently.
    pub fn default_rules() -> Self {
        let rules = vec![
            (
                Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap(),
                "[redacted-email]".to_string(),
            ),
            (
                Regex::new(r"\+?\d[\d\-\s]{7,}\d").unwrap(),
                "[redacted-phone]".to_string(),
            ),
        ];
        Redactor::new(rules)
    }

    pub fn redact(&self, text: &str) -> String {
        let mut out = text.to_string();
        for (pattern, replacement) in &self.rules {
            out = pattern.replace_all(&out, replacement.as_str()).into_owned();
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_email_addresses() {
        let redactor = Redactor::default_rules();
        let out = redactor.redact("contact me at jane.doe@example.com please");
        assert_eq!(out, "contact me at [redacted-email] please");
    }

    #[test]
    fn redacts_phone_numbers() {
        let redactor = Redactor::default_rules();
        let out = redactor.redact("call 555-123-4567 now");
        assert_eq!(out, "call [redacted-phone] now");
    }

    #[test]
    fn leaves_unmatched_text_untouched() {
        let redactor = Redactor::default_rules();
        assert_eq!(redactor.redact("no pii here"), "no pii here");
    }
}
