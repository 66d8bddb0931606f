//! Short human-typable session identifiers of the form `PREFIX-NNNN`.

use rand::Rng;

const DIGITS: usize = 4;
const MIN_NUMBER: u16 = 1000;
const MAX_NUMBER: u16 = 9999;

/// Produce `PREFIX-` followed by four random digits (1000..=9999).
///
/// Codes are not unique by construction; the caller retries on collision.
pub fn generate(prefix: &str) -> String {
    let number = rand::rng().random_range(MIN_NUMBER..=MAX_NUMBER);
    format!("{}-{number}", normalize(prefix))
}

/// Whether `code` is exactly `PREFIX-DDDD`, ignoring case.
pub fn validate(prefix: &str, code: &str) -> bool {
    let Some((head, digits)) = code.split_once('-') else {
        return false;
    };
    head.eq_ignore_ascii_case(prefix)
        && digits.len() == DIGITS
        && digits.bytes().all(|b| b.is_ascii_digit())
}

/// Trim surrounding whitespace and upper-case.
pub fn normalize(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Controller join URL embedding the normalized code as a path segment.
pub fn join_url(base_url: &str, code: &str) -> String {
    format!("{}/remote/{}", base_url.trim_end_matches('/'), normalize(code))
}

/// Codec bound to one configured prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCodec {
    prefix: String,
}

impl SessionCodec {
    /// Codec for `prefix`, normalized.
    pub fn new(prefix: impl AsRef<str>) -> Self {
        Self {
            prefix: normalize(prefix.as_ref()),
        }
    }

    /// Normalized prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// See [`generate`].
    pub fn generate(&self) -> String {
        generate(&self.prefix)
    }

    /// See [`validate`].
    pub fn validate(&self, code: &str) -> bool {
        validate(&self.prefix, code)
    }

    /// Normalize then validate, returning the canonical code when well-formed.
    pub fn parse(&self, input: &str) -> Option<String> {
        let code = normalize(input);
        self.validate(&code).then_some(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_codes_validate_after_normalization() {
        let codec = SessionCodec::new("kolo");
        for _ in 0..500 {
            let code = codec.generate();
            assert!(codec.validate(&normalize(&code)), "rejected {code}");
            let number: u16 = code["KOLO-".len()..].parse().unwrap();
            assert!((MIN_NUMBER..=MAX_NUMBER).contains(&number));
        }
    }

    #[test]
    fn validate_is_case_insensitive() {
        assert!(validate("KOLO", "kolo-1234"));
        assert!(validate("kolo", "KOLO-1234"));
    }

    #[test]
    fn validate_rejects_everything_else() {
        for bad in [
            "",
            "KOLO",
            "KOLO-",
            "KOLO-123",
            "KOLO-12345",
            "KOLO-12a4",
            "KOLO 1234",
            "KOLA-1234",
            " KOLO-1234",
            "KOLO--1234",
            "KOLO-١٢٣٤",
        ] {
            assert!(!validate("KOLO", bad), "accepted {bad:?}");
        }
    }

    #[test]
    fn normalize_trims_and_uppercases() {
        assert_eq!(normalize("  kolo-0042\n"), "KOLO-0042");
        assert_eq!(normalize("???"), "???");
    }

    #[test]
    fn parse_returns_canonical_code() {
        let codec = SessionCodec::new("KOLO");
        assert_eq!(codec.parse(" kolo-4321 ").as_deref(), Some("KOLO-4321"));
        assert_eq!(codec.parse("kolo-43"), None);
    }

    #[test]
    fn join_url_embeds_normalized_code() {
        assert_eq!(
            join_url("https://wheel.example/", " kolo-1234"),
            "https://wheel.example/remote/KOLO-1234"
        );
    }
}
