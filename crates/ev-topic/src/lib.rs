// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

//! Broker topic grammar.
//!
//! Topics are `/`-delimited, rooted at the literal `everest`. This module is
//! a pure parser/builder pair: it never touches the network and allocates
//! nothing beyond the resulting [`TopicInfo`].

use std::fmt;

const ROOT: &str = "everest";

/// The classification of a parsed topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicType {
    /// `everest/<peer>/var/<name>` or `everest/<peer>/<impl>/var/<name>`.
    Var,
    /// `everest/<peer>/cmd/<name>` or `everest/<peer>/<impl>/cmd/<name>`.
    Cmd,
    /// `everest/<peer>/result`.
    Result,
    /// Does not start with the literal `everest/` prefix — opaque passthrough.
    Other,
    /// Starts with `everest/` but does not otherwise match the grammar.
    Invalid,
}

/// A topic string parsed into its tagged components.
///
/// `peer_id`, `impl_id`, and `name` are empty strings for [`TopicType::Other`]
/// and [`TopicType::Invalid`]; `impl_id` is empty whenever the topic has no
/// implementation segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicInfo {
    pub topic_type: TopicType,
    pub peer_id: String,
    pub impl_id: String,
    pub name: String,
}

impl TopicInfo {
    fn other() -> Self {
        Self {
            topic_type: TopicType::Other,
            peer_id: String::new(),
            impl_id: String::new(),
            name: String::new(),
        }
    }

    fn invalid() -> Self {
        Self {
            topic_type: TopicType::Invalid,
            peer_id: String::new(),
            impl_id: String::new(),
            name: String::new(),
        }
    }
}

/// Parse a raw broker topic string into a [`TopicInfo`].
///
/// The parser is pure and total: every input string produces some
/// `TopicInfo`, never an error. Malformed-but-`everest`-rooted topics
/// classify as [`TopicType::Invalid`]; anything else classifies as
/// [`TopicType::Other`].
#[must_use]
pub fn parse_topic(topic: &str) -> TopicInfo {
    let Some(rest) = topic.strip_prefix("everest/") else {
        return TopicInfo::other();
    };

    let segments: Vec<&str> = rest.split('/').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return TopicInfo::invalid();
    }

    match segments.as_slice() {
        [peer, "result"] => TopicInfo {
            topic_type: TopicType::Result,
            peer_id: (*peer).to_string(),
            impl_id: String::new(),
            name: String::new(),
        },
        [peer, "var", name] => TopicInfo {
            topic_type: TopicType::Var,
            peer_id: (*peer).to_string(),
            impl_id: String::new(),
            name: (*name).to_string(),
        },
        [peer, "cmd", name] => TopicInfo {
            topic_type: TopicType::Cmd,
            peer_id: (*peer).to_string(),
            impl_id: String::new(),
            name: (*name).to_string(),
        },
        [peer, impl_id, "var", name] => TopicInfo {
            topic_type: TopicType::Var,
            peer_id: (*peer).to_string(),
            impl_id: (*impl_id).to_string(),
            name: (*name).to_string(),
        },
        [peer, impl_id, "cmd", name] => TopicInfo {
            topic_type: TopicType::Cmd,
            peer_id: (*peer).to_string(),
            impl_id: (*impl_id).to_string(),
            name: (*name).to_string(),
        },
        _ => TopicInfo::invalid(),
    }
}

/// Build `everest/<peer>/var/<name>` or `everest/<peer>/<impl>/var/<name>`
/// when `impl_id` is non-empty.
#[must_use]
pub fn build_var_topic(peer_id: &str, impl_id: &str, name: &str) -> String {
    build_typed_topic(peer_id, impl_id, "var", name)
}

/// Build `everest/<peer>/cmd/<name>` or `everest/<peer>/<impl>/cmd/<name>`
/// when `impl_id` is non-empty.
#[must_use]
pub fn build_cmd_topic(peer_id: &str, impl_id: &str, name: &str) -> String {
    build_typed_topic(peer_id, impl_id, "cmd", name)
}

fn build_typed_topic(peer_id: &str, impl_id: &str, infix: &str, name: &str) -> String {
    if impl_id.is_empty() {
        format!("{ROOT}/{peer_id}/{infix}/{name}")
    } else {
        format!("{ROOT}/{peer_id}/{impl_id}/{infix}/{name}")
    }
}

/// Build `everest/<peer>/result`.
#[must_use]
pub fn build_result_topic(peer_id: &str) -> String {
    format!("{ROOT}/{peer_id}/result")
}

impl fmt::Display for TopicInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}({}, {}, {})",
            self.topic_type, self.peer_id, self.impl_id, self.name
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_var_without_impl() {
        let t = parse_topic("everest/pX/var/v");
        assert_eq!(t.topic_type, TopicType::Var);
        assert_eq!(t.peer_id, "pX");
        assert_eq!(t.impl_id, "");
        assert_eq!(t.name, "v");
    }

    #[test]
    fn parses_cmd_with_impl() {
        let t = parse_topic("everest/pX/iY/cmd/c");
        assert_eq!(t.topic_type, TopicType::Cmd);
        assert_eq!(t.peer_id, "pX");
        assert_eq!(t.impl_id, "iY");
        assert_eq!(t.name, "c");
    }

    #[test]
    fn parses_result() {
        let t = parse_topic("everest/pX/result");
        assert_eq!(t.topic_type, TopicType::Result);
        assert_eq!(t.peer_id, "pX");
        assert_eq!(t.impl_id, "");
        assert_eq!(t.name, "");
    }

    #[test]
    fn rejects_empty_segments() {
        assert_eq!(parse_topic("everest//var/v").topic_type, TopicType::Invalid);
        assert_eq!(parse_topic("everest/pX/").topic_type, TopicType::Invalid);
        assert_eq!(parse_topic("everest/pX/var/").topic_type, TopicType::Invalid);
    }

    #[test]
    fn non_everest_prefix_is_other() {
        assert_eq!(parse_topic("$sys/x").topic_type, TopicType::Other);
        assert_eq!(parse_topic("everest").topic_type, TopicType::Other);
    }

    #[test]
    fn trailing_or_extra_segments_are_invalid() {
        assert_eq!(
            parse_topic("everest/pX/iY/cmd/c/extra").topic_type,
            TopicType::Invalid
        );
        assert_eq!(parse_topic("everest/pX/cmd").topic_type, TopicType::Invalid);
    }

    #[test]
    fn builders_round_trip_through_parser() {
        let var_topic = build_var_topic("mod_a", "", "temperature");
        let parsed = parse_topic(&var_topic);
        assert_eq!(parsed.topic_type, TopicType::Var);
        assert_eq!(parsed.peer_id, "mod_a");
        assert_eq!(parsed.impl_id, "");
        assert_eq!(parsed.name, "temperature");

        let cmd_topic = build_cmd_topic("mod_a", "main", "start");
        let parsed = parse_topic(&cmd_topic);
        assert_eq!(parsed.topic_type, TopicType::Cmd);
        assert_eq!(parsed.impl_id, "main");

        let result_topic = build_result_topic("mod_a");
        let parsed = parse_topic(&result_topic);
        assert_eq!(parsed.topic_type, TopicType::Result);
        assert_eq!(parsed.peer_id, "mod_a");
    }

    proptest::proptest! {
        #[test]
        fn round_trip_holds_for_arbitrary_identifiers(
            peer in "[a-zA-Z0-9_]{1,12}",
            impl_id in "[a-zA-Z0-9_]{0,12}",
            name in "[a-zA-Z0-9_]{1,12}",
        ) {
            let topic = build_var_topic(&peer, &impl_id, &name);
            let parsed = parse_topic(&topic);
            proptest::prop_assert_eq!(parsed.topic_type, TopicType::Var);
            proptest::prop_assert_eq!(parsed.peer_id, peer);
            proptest::prop_assert_eq!(parsed.impl_id, impl_id);
            proptest::prop_assert_eq!(parsed.name, name);
        }
    }
}
