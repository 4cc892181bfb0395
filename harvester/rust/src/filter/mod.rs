//! Plausibility filter for harvested addresses.
//!
//! Pure functions only. The same input always gives the same answer.

/// Domains that never receive personal mail.
const SYSTEM_DOMAINS: &[&str] = &[
    "localhost",
    "localhost.localdomain",
    "noreply.github.com",
    "users.noreply.github.com",
    "github.com",
    "gitlab.com",
    "none.com",
    "invalid.com",
];

/// Placeholder domains used in docs, tests and misconfigured git clients.
const PLACEHOLDER_DOMAINS: &[&str] = &[
    "example.com",
    "example.org",
    "example.net",
    "test.com",
    "test.org",
    "domain.com",
    "email.com",
    "foo.com",
    "bar.com",
    "foo.bar",
    "company.com",
    "yourdomain.com",
];

/// Top-level labels reserved for testing and documentation.
const RESERVED_TLDS: &[&str] = &["test", "example", "invalid", "localhost", "local", "localdomain"];

/// Local-parts that name a role or a robot rather than a person.
const ROLE_LOCAL_PARTS: &[&str] = &[
    "admin",
    "administrator",
    "info",
    "contact",
    "postmaster",
    "hostmaster",
    "webmaster",
    "mailer-daemon",
    "noreply",
    "no-reply",
    "donotreply",
    "do-not-reply",
    "root",
    "support",
    "help",
    "sales",
    "abuse",
    "security",
    "nobody",
    "test",
    "temp",
    "user",
    "email",
    "git",
];

/// The hosting service's synthetic address domain.
const SYNTHETIC_DOMAIN_SUFFIX: &str = "noreply.github.com";

const MAX_ADDRESS_LEN: usize = 254;

/// Trims and lowercases an address.
pub fn normalize(address: &str) -> String {
    address.trim().to_lowercase()
}

/// Returns true if `address` looks like a real personal or work address.
pub fn is_plausible(address: &str) -> bool {
    let address = normalize(address);
    if address.is_empty() || address.len() > MAX_ADDRESS_LEN {
        return false;
    }

    let Some((local, domain)) = split(&address) else {
        return false;
    };

    valid_local(local) && valid_domain(domain) && !is_rejected_domain(domain) && !is_role(local)
}

fn split(address: &str) -> Option<(&str, &str)> {
    let (local, domain) = address.split_once('@')?;
    if domain.contains('@') {
        return None;
    }
    Some((local, domain))
}

fn valid_local(local: &str) -> bool {
    !local.is_empty()
        && local.len() <= 64
        && !local.starts_with('.')
        && !local.ends_with('.')
        && !local.contains("..")
        && local
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "!#$%&'*+-/=?^_`{|}~.".contains(c))
}

fn valid_domain(domain: &str) -> bool {
    if !domain.contains('.') || domain.contains("..") {
        return false;
    }
    domain.split('.').all(|label| {
        !label.is_empty()
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}

fn is_rejected_domain(domain: &str) -> bool {
    if domain.ends_with(SYNTHETIC_DOMAIN_SUFFIX) {
        return true;
    }
    if SYSTEM_DOMAINS.contains(&domain) || PLACEHOLDER_DOMAINS.contains(&domain) {
        return true;
    }
    if domain.contains("noreply") || domain.contains("no-reply") {
        return true;
    }
    domain
        .rsplit('.')
        .next()
        .map(|tld| RESERVED_TLDS.contains(&tld))
        .unwrap_or(true)
}

/// Role names matched exactly or as a prefix of the local part
/// (`noreply+ci`, `admin.team`, `infodesk`).
fn is_role(local: &str) -> bool {
    ROLE_LOCAL_PARTS
        .iter()
        .any(|role| local == *role || local.starts_with(role))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("jane.doe@example-org.dev" ; "personal address")]
    #[test_case("  Jane.Doe@Corp.Dev " ; "mixed case with padding")]
    #[test_case("dev+oss@fastmail.fm" ; "plus tag")]
    #[test_case("jane.admin@corp.dev" ; "role word after the start")]
    fn test_plausible(address: &str) {
        assert!(is_plausible(address));
    }

    #[test_case("" ; "empty")]
    #[test_case("jane" ; "no at sign")]
    #[test_case("jane@localhost" ; "no domain dot")]
    #[test_case("a@b@corp.dev" ; "two at signs")]
    #[test_case("jane..doe@corp.dev" ; "double dot")]
    #[test_case("jane@-corp.dev" ; "bad label")]
    #[test_case("12345+octo@users.noreply.github.com" ; "synthetic domain")]
    #[test_case("octo@noreply.github.com" ; "noreply domain")]
    #[test_case("alerts@no-reply.corp.dev" ; "no-reply subdomain")]
    #[test_case("jane@example.com" ; "example domain")]
    #[test_case("jane@test.com" ; "test domain")]
    #[test_case("jane@build.local" ; "local tld")]
    #[test_case("jane@corp.invalid" ; "invalid tld")]
    #[test_case("admin@corp.dev" ; "admin")]
    #[test_case("info@corp.dev" ; "info")]
    #[test_case("contact@corp.dev" ; "contact")]
    #[test_case("postmaster@corp.dev" ; "postmaster")]
    #[test_case("noreply@corp.dev" ; "noreply")]
    #[test_case("noreply+ci@corp.dev" ; "noreply with tag")]
    #[test_case("test@corp.dev" ; "test")]
    #[test_case("test123@corp.dev" ; "test with digits")]
    #[test_case("temp@corp.dev" ; "temp")]
    #[test_case("admin.team@corp.dev" ; "admin prefix")]
    #[test_case("adminjane@corp.dev" ; "admin prefix without separator")]
    #[test_case("infodesk@corp.dev" ; "info prefix")]
    #[test_case("contactus@corp.dev" ; "contact prefix")]
    #[test_case("testerman@corp.dev" ; "test prefix")]
    #[test_case("information.officer@corp.dev" ; "info prefix with dot later")]
    fn test_rejected(address: &str) {
        assert!(!is_plausible(address));
    }

    #[test]
    fn test_is_deterministic() {
        for address in ["jane.doe@example-org.dev", "admin@corp.dev", "x"] {
            assert_eq!(is_plausible(address), is_plausible(address));
        }
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  Jane@Corp.DEV\n"), "jane@corp.dev");
    }
}
