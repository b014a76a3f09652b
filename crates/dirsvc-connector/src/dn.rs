//! Distinguished-name helpers.

/// Escape special characters in a DN attribute value (RFC 4514).
pub fn escape_dn_value(value: &str) -> String {
    let count = value.chars().count();
    let mut result = String::with_capacity(value.len() * 2);

    for (i, ch) in value.chars().enumerate() {
        let is_first = i == 0;
        let is_last = i + 1 == count;

        match ch {
            ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=' => {
                result.push('\\');
                result.push(ch);
            }
            '\0' => result.push_str("\\00"),
            ' ' if is_first || is_last => result.push_str("\\20"),
            '#' if is_first => result.push_str("\\23"),
            _ => result.push(ch),
        }
    }

    result
}

/// Turn a common name into a `CN=` RDN.
///
/// Values already carrying a `CN=` prefix (any case) are taken as a
/// preformed RDN; bare names are escaped.
pub fn cn_rdn(name: &str) -> String {
    if has_cn_prefix(name) {
        name.to_string()
    } else {
        format!("CN={}", escape_dn_value(name))
    }
}

/// The bare common-name value, without any `CN=` prefix.
pub fn cn_value(name: &str) -> &str {
    if has_cn_prefix(name) {
        &name[3..]
    } else {
        name
    }
}

fn has_cn_prefix(name: &str) -> bool {
    name.get(..3).is_some_and(|p| p.eq_ignore_ascii_case("cn="))
}

/// `rdn,parent`, or just `rdn` when the parent is empty.
pub fn join(rdn: &str, parent: &str) -> String {
    if parent.is_empty() {
        rdn.to_string()
    } else {
        format!("{rdn},{parent}")
    }
}

/// Whether `dn` is `base` or lies beneath it (case-insensitive).
pub fn is_within(dn: &str, base: &str) -> bool {
    if base.is_empty() {
        return true;
    }
    let dn = dn.to_ascii_lowercase();
    let base = base.to_ascii_lowercase();
    dn == base || dn.ends_with(&format!(",{base}"))
}

/// Split a DN into its first RDN and the parent DN, honouring escapes.
pub fn split_first(dn: &str) -> (&str, &str) {
    let mut escaped = false;
    for (i, ch) in dn.char_indices() {
        match ch {
            '\\' if !escaped => escaped = true,
            ',' if !escaped => return (&dn[..i], &dn[i + 1..]),
            _ => escaped = false,
        }
    }
    (dn, "")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_dn_value_simple() {
        assert_eq!(escape_dn_value("John Doe"), "John Doe");
    }

    #[test]
    fn test_escape_dn_value_special_chars() {
        assert_eq!(escape_dn_value("Doe, John"), "Doe\\, John");
        assert_eq!(escape_dn_value("a+b"), "a\\+b");
        assert_eq!(escape_dn_value("x=y"), "x\\=y");
    }

    #[test]
    fn test_escape_dn_value_leading_trailing() {
        assert_eq!(escape_dn_value(" lead"), "\\20lead");
        assert_eq!(escape_dn_value("trail "), "trail\\20");
        assert_eq!(escape_dn_value("#hash"), "\\23hash");
        assert_eq!(escape_dn_value("ä "), "ä\\20");
    }

    #[test]
    fn test_cn_rdn() {
        assert_eq!(cn_rdn("MattiMeikalainen"), "CN=MattiMeikalainen");
        assert_eq!(cn_rdn("cn=MattiMeikalainen"), "cn=MattiMeikalainen");
        assert_eq!(cn_rdn("Doe, John"), "CN=Doe\\, John");
        assert_eq!(cn_value("CN=Matti"), "Matti");
        assert_eq!(cn_value("Matti"), "Matti");
    }

    #[test]
    fn test_join_and_within() {
        assert_eq!(join("CN=a", "DC=t"), "CN=a,DC=t");
        assert_eq!(join("CN=a", ""), "CN=a");
        assert!(is_within("CN=a,OU=Users,DC=t", "ou=users,dc=t"));
        assert!(!is_within("CN=a,OU=UsersX,DC=t", "OU=Users,DC=t"));
    }

    #[test]
    fn test_split_first() {
        assert_eq!(split_first("CN=a,OU=b,DC=c"), ("CN=a", "OU=b,DC=c"));
        assert_eq!(split_first("CN=Doe\\, John,DC=c"), ("CN=Doe\\, John", "DC=c"));
        assert_eq!(split_first("DC=c"), ("DC=c", ""));
    }
}
