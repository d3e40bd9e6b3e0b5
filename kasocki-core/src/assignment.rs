//! Assignment validation: turns a raw `subscribe` request into a normalized
//! list of `{topic, partition, offset}` tuples.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::broker::BrokerMetadata;
use crate::error::KasockiError;

/// A `(topic, partition, offset)` tuple declaring where a session begins
/// reading in one partition. `offset == -1` denotes "latest".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    /// Topic name.
    pub topic: String,
    /// Partition id, always non-negative.
    pub partition: i32,
    /// Starting offset; `-1` means "latest".
    pub offset: i64,
}

/// Offset value meaning "start from the latest record".
pub const LATEST_OFFSET: i64 = -1;

/// One entry of a raw subscribe request: either a bare topic name or an
/// explicit assignment tuple. Kept distinct (rather than collapsed via
/// `#[serde(untagged)]` directly into `Assignment`) so mixed-form requests
/// can be detected and rejected explicitly.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AssignmentEntry {
    /// A bare topic name, to be expanded to all of its partitions.
    Topic(String),
    /// An explicit assignment tuple, passed through unchanged.
    Explicit(Assignment),
}

/// The raw `subscribe` argument as it arrives over the wire: a single topic
/// name, a list of topic names, or a list of explicit assignments.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SubscribeRequest {
    /// A single bare topic name (promoted to a one-element sequence).
    Single(String),
    /// A list of topic names and/or explicit assignments.
    Many(Vec<AssignmentEntry>),
}

impl SubscribeRequest {
    fn into_entries(self) -> Vec<AssignmentEntry> {
        match self {
            Self::Single(topic) => vec![AssignmentEntry::Topic(topic)],
            Self::Many(entries) => entries,
        }
    }
}

/// Validate and normalize a `subscribe` request against the session's
/// `availableTopics` and the broker's current metadata.
///
/// # Errors
///
/// - [`KasockiError::InvalidAssignment`] if the request is empty, mixes
///   topic-name and explicit-tuple entries, or contains an explicit tuple
///   with a negative partition or an offset less than `-1`.
/// - [`KasockiError::TopicNotAvailable`] citing the first offending topic
///   name if any requested topic is outside `available_topics`.
pub fn normalize_subscribe_request(
    request: SubscribeRequest,
    available_topics: &BTreeSet<String>,
    metadata: &BrokerMetadata,
) -> Result<Vec<Assignment>, KasockiError> {
    let entries = request.into_entries();
    if entries.is_empty() {
        return Err(KasockiError::InvalidAssignment(
            "subscribe request must not be empty".to_string(),
        ));
    }

    let has_topic_form = entries.iter().any(|e| matches!(e, AssignmentEntry::Topic(_)));
    let has_explicit_form = entries
        .iter()
        .any(|e| matches!(e, AssignmentEntry::Explicit(_)));
    if has_topic_form && has_explicit_form {
        return Err(KasockiError::InvalidAssignment(
            "subscribe request mixes topic names and explicit assignments".to_string(),
        ));
    }

    let mut normalized = Vec::new();
    if has_explicit_form {
        for entry in entries {
            let AssignmentEntry::Explicit(assignment) = entry else {
                unreachable!("mixed-form already rejected above");
            };
            if assignment.partition < 0 {
                return Err(KasockiError::InvalidAssignment(format!(
                    "partition must be non-negative, got {}",
                    assignment.partition
                )));
            }
            if assignment.offset < LATEST_OFFSET {
                return Err(KasockiError::InvalidAssignment(format!(
                    "offset must be -1 or non-negative, got {}",
                    assignment.offset
                )));
            }
            normalized.push(assignment);
        }
    } else {
        for entry in entries {
            let AssignmentEntry::Topic(topic) = entry else {
                unreachable!("topic form checked above");
            };
            if !available_topics.contains(&topic) {
                return Err(KasockiError::TopicNotAvailable(topic));
            }
            let partitions = metadata.topics.get(&topic).cloned().unwrap_or_default();
            for partition in partitions {
                normalized.push(Assignment {
                    topic: topic.clone(),
                    partition,
                    offset: LATEST_OFFSET,
                });
            }
        }
    }

    for assignment in &normalized {
        if !available_topics.contains(&assignment.topic) {
            return Err(KasockiError::TopicNotAvailable(assignment.topic.clone()));
        }
    }

    Ok(normalized)
}

/// Compute `availableTopics` = `metadata.topics ∩ allowedTopics`, or the
/// identity of `metadata.topics` if no allow-list was configured.
#[must_use]
pub fn available_topics(
    metadata: &BrokerMetadata,
    allowed_topics: Option<&BTreeSet<String>>,
) -> BTreeSet<String> {
    match allowed_topics {
        Some(allowed) => metadata
            .topics
            .keys()
            .filter(|topic| allowed.contains(*topic))
            .cloned()
            .collect(),
        None => metadata.topics.keys().cloned().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> BrokerMetadata {
        let mut topics = std::collections::BTreeMap::new();
        topics.insert("kasocki_test_01".to_string(), vec![0]);
        topics.insert("kasocki_test_02".to_string(), vec![0, 1]);
        topics
    }

    fn topics_from(metadata: &BrokerMetadata) -> BTreeSet<String> {
        metadata.topics.keys().cloned().collect()
    }

    #[test]
    fn expands_topic_name_form_to_all_partitions() {
        let md = BrokerMetadata { topics: metadata() };
        let available = topics_from(&md);
        let request = SubscribeRequest::Many(vec![AssignmentEntry::Topic(
            "kasocki_test_02".to_string(),
        )]);
        let normalized = normalize_subscribe_request(request, &available, &md).unwrap();
        assert_eq!(
            normalized,
            vec![
                Assignment { topic: "kasocki_test_02".to_string(), partition: 0, offset: -1 },
                Assignment { topic: "kasocki_test_02".to_string(), partition: 1, offset: -1 },
            ]
        );
    }

    #[test]
    fn single_bare_string_is_promoted() {
        let md = BrokerMetadata { topics: metadata() };
        let available = topics_from(&md);
        let request = SubscribeRequest::Single("kasocki_test_01".to_string());
        let normalized = normalize_subscribe_request(request, &available, &md).unwrap();
        assert_eq!(
            normalized,
            vec![Assignment { topic: "kasocki_test_01".to_string(), partition: 0, offset: -1 }]
        );
    }

    #[test]
    fn explicit_form_passes_through_unchanged() {
        let md = BrokerMetadata { topics: metadata() };
        let available = topics_from(&md);
        let request = SubscribeRequest::Many(vec![AssignmentEntry::Explicit(Assignment {
            topic: "kasocki_test_02".to_string(),
            partition: 0,
            offset: 0,
        })]);
        let normalized = normalize_subscribe_request(request, &available, &md).unwrap();
        assert_eq!(normalized[0].offset, 0);
    }

    #[test]
    fn rejects_mixed_form() {
        let md = BrokerMetadata { topics: metadata() };
        let available = topics_from(&md);
        let request = SubscribeRequest::Many(vec![
            AssignmentEntry::Topic("kasocki_test_01".to_string()),
            AssignmentEntry::Explicit(Assignment {
                topic: "kasocki_test_02".to_string(),
                partition: 0,
                offset: 0,
            }),
        ]);
        let err = normalize_subscribe_request(request, &available, &md).unwrap_err();
        assert!(matches!(err, KasockiError::InvalidAssignment(_)));
    }

    #[test]
    fn rejects_empty_request() {
        let md = BrokerMetadata { topics: metadata() };
        let available = topics_from(&md);
        let err =
            normalize_subscribe_request(SubscribeRequest::Many(vec![]), &available, &md).unwrap_err();
        assert!(matches!(err, KasockiError::InvalidAssignment(_)));
    }

    #[test]
    fn rejects_negative_partition() {
        let md = BrokerMetadata { topics: metadata() };
        let available = topics_from(&md);
        let request = SubscribeRequest::Many(vec![AssignmentEntry::Explicit(Assignment {
            topic: "kasocki_test_01".to_string(),
            partition: -1,
            offset: 0,
        })]);
        let err = normalize_subscribe_request(request, &available, &md).unwrap_err();
        assert!(matches!(err, KasockiError::InvalidAssignment(_)));
    }

    #[test]
    fn rejects_invalid_negative_offset() {
        let md = BrokerMetadata { topics: metadata() };
        let available = topics_from(&md);
        let request = SubscribeRequest::Many(vec![AssignmentEntry::Explicit(Assignment {
            topic: "kasocki_test_01".to_string(),
            partition: 0,
            offset: -2,
        })]);
        let err = normalize_subscribe_request(request, &available, &md).unwrap_err();
        assert!(matches!(err, KasockiError::InvalidAssignment(_)));
    }

    #[test]
    fn rejects_topic_outside_available_set() {
        let md = BrokerMetadata { topics: metadata() };
        let available: BTreeSet<String> = ["kasocki_test_01".to_string()].into_iter().collect();
        let request = SubscribeRequest::Single("kasocki_test_02".to_string());
        let err = normalize_subscribe_request(request, &available, &md).unwrap_err();
        assert!(matches!(err, KasockiError::TopicNotAvailable(topic) if topic == "kasocki_test_02"));
    }

    #[test]
    fn available_topics_intersects_allow_list() {
        let md = BrokerMetadata { topics: metadata() };
        let allowed: BTreeSet<String> = ["kasocki_test_01".to_string()].into_iter().collect();
        let result = available_topics(&md, Some(&allowed));
        assert_eq!(result, allowed);
    }

    #[test]
    fn rejects_topic_name_absent_from_broker_metadata() {
        let md = BrokerMetadata { topics: metadata() };
        let available = topics_from(&md);
        let request = SubscribeRequest::Single("kasocki_test_99".to_string());
        let err = normalize_subscribe_request(request, &available, &md).unwrap_err();
        assert!(matches!(err, KasockiError::TopicNotAvailable(topic) if topic == "kasocki_test_99"));
    }

    #[test]
    fn available_topics_is_identity_without_allow_list() {
        let md = BrokerMetadata { topics: metadata() };
        let result = available_topics(&md, None);
        assert_eq!(result, topics_from(&md));
    }
}
