//! MD5 content hashing used to give manifests and interfaces a stable
//! identity independent of where they were loaded from.

/// Compute the lowercase hex MD5 digest of `text`.
///
/// `md5("Hello World") == "b10a8db164e0754105b7a99be72e3fe5"`.
#[must_use]
pub fn md5_hash(text: &str) -> String {
    format!("{:x}", md5::compute(text.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vector() {
        assert_eq!(md5_hash("Hello World"), "b10a8db164e0754105b7a99be72e3fe5");
    }
}
