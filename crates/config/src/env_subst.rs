/// Expand `${NAME}` and `${NAME:-fallback}` placeholders from the process
/// environment.
///
/// A placeholder whose variable is unset and has no fallback is kept verbatim.
pub fn substitute_env(input: &str) -> String {
    expand(input, |name| std::env::var(name).ok())
}

fn expand(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            // Unterminated: copy the remainder literally.
            out.push_str(&rest[start..]);
            return out;
        };

        let body = &after[..end];
        let (name, fallback) = match body.split_once(":-") {
            Some((name, fallback)) => (name, Some(fallback)),
            None => (body, None),
        };

        match (name.is_empty(), lookup(name), fallback) {
            (false, Some(value), _) => out.push_str(&value),
            (false, None, Some(fallback)) => out.push_str(fallback),
            _ => out.push_str(&rest[start..start + 2 + end + 1]),
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn env(name: &str) -> Option<String> {
        match name {
            "WARMBOX_TEST_IMAGE" => Some("alpine:3.20".into()),
            _ => None,
        }
    }

    #[test]
    fn expands_known_var() {
        assert_eq!(
            expand("image = \"${WARMBOX_TEST_IMAGE}\"", env),
            "image = \"alpine:3.20\""
        );
    }

    #[test]
    fn uses_fallback_when_unset() {
        assert_eq!(expand("${WARMBOX_UNSET:-docker}", env), "docker");
        assert_eq!(expand("${WARMBOX_TEST_IMAGE:-x}", env), "alpine:3.20");
    }

    #[test]
    fn keeps_unknown_and_malformed() {
        assert_eq!(expand("${WARMBOX_UNSET}", env), "${WARMBOX_UNSET}");
        assert_eq!(expand("a ${} b", env), "a ${} b");
        assert_eq!(expand("tail ${OPEN", env), "tail ${OPEN");
    }

    #[test]
    fn no_placeholders() {
        assert_eq!(substitute_env("plain text"), "plain text");
    }
}
