// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Topic names, topic filters and wildcard matching.

use std::fmt;

use crate::base::{DecodeData, EncodeData};
use crate::utils::validate_utf8_string;
use crate::{ByteArray, DecodeError, EncodeError, StringData};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicError {
    /// Topic string contains no character.
    EmptyTopic,

    /// Topic string is longer than 65535 bytes or invalid UTF-8.
    InvalidString,

    /// Topic name contains wildcard characters.
    WildcardInTopicName,

    /// Wildcard characters are misplaced in topic filter.
    InvalidWildcard,
}

impl From<TopicError> for DecodeError {
    fn from(_e: TopicError) -> Self {
        Self::InvalidTopic
    }
}

impl From<TopicError> for EncodeError {
    fn from(_e: TopicError) -> Self {
        Self::InvalidTopic
    }
}

/// Topic name in PUBLISH packets.
///
/// The Topic Name MUST be present as the first field in the PUBLISH packet
/// Variable Header, and MUST NOT contain wildcard characters [MQTT-3.3.2-2].
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash)]
pub struct PubTopic(String);

impl PubTopic {
    /// Create a new topic name after validation.
    ///
    /// # Errors
    ///
    /// Returns error if `topic` is empty, too long or contains wildcards.
    pub fn new(topic: &str) -> Result<Self, TopicError> {
        if topic.is_empty() {
            return Err(TopicError::EmptyTopic);
        }
        validate_utf8_string(topic).map_err(|_| TopicError::InvalidString)?;
        if topic.contains(['+', '#']) {
            return Err(TopicError::WildcardInTopicName);
        }
        Ok(Self(topic.to_string()))
    }

    /// Get byte length in packet, including the length prefix.
    #[must_use]
    pub fn bytes(&self) -> usize {
        2 + self.0.len()
    }

    /// Get length of inner string.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if topic string is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl AsRef<str> for PubTopic {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PubTopic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl DecodeData for PubTopic {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let s = StringData::decode(ba)?;
        Self::new(s.as_ref()).map_err(DecodeError::from)
    }
}

impl EncodeData for PubTopic {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let s = StringData::from(&self.0).map_err(EncodeError::from)?;
        s.encode(buf)
    }
}

/// One level in a topic filter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum FilterPart {
    /// Literal level string, may be empty.
    Str(String),

    /// `+` character, matches exactly one level.
    SingleWildcard,

    /// `#` character, matches any number of trailing levels.
    MultiWildcard,
}

/// Topic filter in SUBSCRIBE and UNSUBSCRIBE packets.
///
/// The single-level wildcard `+` matches exactly one topic level and can be
/// used at any level in the Topic Filter; the multi-level wildcard `#`
/// matches any number of levels and MUST be the last character of the
/// Topic Filter [MQTT-4.7.1-2].
///
/// Topics beginning with `$` are not matched by filters starting with a
/// wildcard character [MQTT-4.7.2-1].
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash)]
pub struct SubTopic {
    filter: String,
    parts: Vec<FilterPart>,
}

impl SubTopic {
    /// Parse and validate a topic filter.
    ///
    /// # Errors
    ///
    /// Returns error if `filter` is empty, too long, or has misplaced
    /// wildcard characters.
    pub fn parse(filter: &str) -> Result<Self, TopicError> {
        if filter.is_empty() {
            return Err(TopicError::EmptyTopic);
        }
        validate_utf8_string(filter).map_err(|_| TopicError::InvalidString)?;

        let levels: Vec<&str> = filter.split('/').collect();
        let last = levels.len() - 1;
        let mut parts = Vec::with_capacity(levels.len());
        for (index, level) in levels.iter().enumerate() {
            let part = match *level {
                "+" => FilterPart::SingleWildcard,
                "#" => {
                    if index != last {
                        return Err(TopicError::InvalidWildcard);
                    }
                    FilterPart::MultiWildcard
                }
                s => {
                    // `+` and `#` may only occupy an entire level.
                    if s.contains(['+', '#']) {
                        return Err(TopicError::InvalidWildcard);
                    }
                    FilterPart::Str(s.to_string())
                }
            };
            parts.push(part);
        }

        Ok(Self {
            filter: filter.to_string(),
            parts,
        })
    }

    /// Get the filter string.
    #[must_use]
    pub fn filter(&self) -> &str {
        &self.filter
    }

    /// Get byte length in packet, including the length prefix.
    #[must_use]
    pub fn bytes(&self) -> usize {
        2 + self.filter.len()
    }

    /// Returns true if this filter contains wildcard characters.
    #[must_use]
    pub fn has_wildcard(&self) -> bool {
        self.parts
            .iter()
            .any(|p| !matches!(p, FilterPart::Str(_)))
    }

    /// Check whether `topic` matches this filter.
    #[must_use]
    pub fn is_match(&self, topic: &str) -> bool {
        if topic.is_empty() {
            return false;
        }

        // The Server MUST NOT match Topic Filters starting with a wildcard
        // character with Topic Names beginning with a $ character
        // [MQTT-4.7.2-1].
        if topic.starts_with('$')
            && matches!(
                self.parts.first(),
                Some(FilterPart::SingleWildcard | FilterPart::MultiWildcard)
            )
        {
            return false;
        }

        let levels: Vec<&str> = topic.split('/').collect();
        let mut level_index = 0;
        for part in &self.parts {
            match part {
                FilterPart::MultiWildcard => {
                    // `#` also matches the parent level, "sport/#" matches
                    // "sport" [MQTT-4.7.1-2].
                    return true;
                }
                FilterPart::SingleWildcard => {
                    if level_index >= levels.len() || levels[level_index].is_empty() {
                        return false;
                    }
                    level_index += 1;
                }
                FilterPart::Str(s) => {
                    if level_index >= levels.len() || levels[level_index] != s {
                        return false;
                    }
                    level_index += 1;
                }
            }
        }

        level_index == levels.len()
    }
}

impl AsRef<str> for SubTopic {
    fn as_ref(&self) -> &str {
        &self.filter
    }
}

impl fmt::Display for SubTopic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.filter)
    }
}

impl DecodeData for SubTopic {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let s = StringData::decode(ba)?;
        Self::parse(s.as_ref()).map_err(DecodeError::from)
    }
}

impl EncodeData for SubTopic {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let s = StringData::from(&self.filter).map_err(EncodeError::from)?;
        s.encode(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pub_topic() {
        assert!(PubTopic::new("a/b/c").is_ok());
        assert!(PubTopic::new("").is_err());
        assert!(PubTopic::new("a/+/c").is_err());
        assert!(PubTopic::new("a/#").is_err());
    }

    #[test]
    fn test_sub_topic_parse() {
        assert!(SubTopic::parse("a/b/c").is_ok());
        assert!(SubTopic::parse("a/+/c").is_ok());
        assert!(SubTopic::parse("#").is_ok());
        assert!(SubTopic::parse("a/#").is_ok());
        assert!(SubTopic::parse("").is_err());
        assert!(SubTopic::parse("a/#/c").is_err());
        assert!(SubTopic::parse("a/b#").is_err());
        assert!(SubTopic::parse("a/b+/c").is_err());
    }

    #[test]
    fn test_single_wildcard_match() {
        let filter = SubTopic::parse("home/+/temp").unwrap();
        assert!(filter.is_match("home/kitchen/temp"));
        assert!(!filter.is_match("home/kitchen/living/temp"));
        assert!(!filter.is_match("home/temp"));

        let filter = SubTopic::parse("+").unwrap();
        assert!(filter.is_match("abc"));
        assert!(!filter.is_match("a/b"));
    }

    #[test]
    fn test_multi_wildcard_match() {
        let filter = SubTopic::parse("sport/#").unwrap();
        assert!(filter.is_match("sport"));
        assert!(filter.is_match("sport/tennis"));
        assert!(filter.is_match("sport/tennis/player1"));
        assert!(!filter.is_match("other"));

        let filter = SubTopic::parse("#").unwrap();
        assert!(filter.is_match("a"));
        assert!(filter.is_match("a/b/c"));
    }

    #[test]
    fn test_dollar_topics() {
        let filter = SubTopic::parse("#").unwrap();
        assert!(!filter.is_match("$SYS/uptime"));

        let filter = SubTopic::parse("+/uptime").unwrap();
        assert!(!filter.is_match("$SYS/uptime"));

        let filter = SubTopic::parse("$SYS/#").unwrap();
        assert!(filter.is_match("$SYS/uptime"));
    }

    #[test]
    fn test_exact_match() {
        let filter = SubTopic::parse("a/b").unwrap();
        assert!(filter.is_match("a/b"));
        assert!(!filter.is_match("a/b/c"));
        assert!(!filter.is_match("a"));
    }
}
