//! # Role ARNs
//!
//! Structural validation and prefixing of IAM role identifiers.
//! See <http://docs.aws.amazon.com/IAM/latest/UserGuide/reference_identifiers.html#identifiers-arns>.

use regex::Regex;
use std::sync::LazyLock;

const FULL_ARN_PREFIX: &str = "arn:";

static ROLE_ARN_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^arn:(\w|-)*:iam::\d+:role/?(\w+|-|/|\.)*$")
        .expect("Failed to compile ROLE_ARN_REGEX - this should never happen")
});

/// Check that a role identifier (or a base prefix) has the `arn:<partition>:iam::<account>:role/...` shape
pub fn is_valid_role_arn(arn: &str) -> bool {
    ROLE_ARN_REGEX.is_match(arn)
}

/// Check that a configured base role prefix is usable
pub fn is_valid_base_arn(arn: &str) -> bool {
    is_valid_role_arn(arn)
}

/// Whether the identifier already carries the fully-qualified prefix (case-insensitive)
pub fn is_fully_qualified(role: &str) -> bool {
    role.get(..FULL_ARN_PREFIX.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(FULL_ARN_PREFIX))
}

/// Return the full role ARN for a bare role name, or the identifier unchanged if already qualified
pub fn role_arn(base_arn: &str, role: &str) -> String {
    if is_fully_qualified(role) {
        return role.to_string();
    }
    format!("{base_arn}{role}")
}

/// Final path segment of a role ARN (`arn:aws:iam::1:role/team/app` -> `app`)
pub fn role_name(arn: &str) -> &str {
    arn.rsplit('/').next().unwrap_or(arn)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "arn:aws:iam::123456789012:role/";

    #[test]
    fn test_valid_role_arns() {
        assert!(is_valid_role_arn("arn:aws:iam::123456789012:role/name"));
        assert!(is_valid_role_arn("arn:aws:iam::123456789012:role/path/to/my-role.v2"));
        assert!(is_valid_role_arn("arn:aws-cn:iam::123456789012:role/name"));
        assert!(is_valid_role_arn(BASE));
    }

    #[test]
    fn test_invalid_role_arns() {
        assert!(!is_valid_role_arn("billing-role"));
        assert!(!is_valid_role_arn("arn:aws:iam::role/name"));
        assert!(!is_valid_role_arn("arn:aws:iam::123456789012:user/name"));
        assert!(!is_valid_role_arn("arn:aws:s3::123456789012:role/name"));
        assert!(!is_valid_role_arn("arn:aws:iam::123456789012:role/name with spaces"));
    }

    #[test]
    fn test_role_arn_prefixes_bare_names() {
        for name in ["billing-role", "team/app", "x"] {
            assert_eq!(role_arn(BASE, name), format!("{BASE}{name}"));
        }
    }

    #[test]
    fn test_role_arn_keeps_qualified_identifiers() {
        let qualified = "arn:aws:iam::999999999999:role/other";
        assert_eq!(role_arn(BASE, qualified), qualified);
        assert_eq!(role_arn(BASE, "ARN:aws:iam::1:role/x"), "ARN:aws:iam::1:role/x");
    }

    #[test]
    fn test_role_arn_without_base() {
        assert_eq!(role_arn("", "billing-role"), "billing-role");
    }

    #[test]
    fn test_role_name() {
        assert_eq!(role_name("arn:aws:iam::1:role/team/app"), "app");
        assert_eq!(role_name("plain"), "plain");
    }
}
