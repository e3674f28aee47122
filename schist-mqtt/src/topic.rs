/*
 * Copyright Bret Ambrose. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0.
 */

/*!
Topic normalization, validation and subscription filter matching.
 */

use crate::error::{SchistError, SchistResult};
use crate::encode::utils::MAXIMUM_STRING_LENGTH;

use log::*;

/// Collapses runs of `/` and strips trailing ones, keeping a single leading `/` if the topic had one.
///
/// `"////a////b//"` normalizes to `"/a/b"`.  A topic made only of slashes normalizes to `""`.
pub fn normalize_topic(topic: &str) -> String {
    let levels : Vec<&str> = topic.split('/').filter(|level| !level.is_empty()).collect();
    if levels.is_empty() {
        return String::new();
    }

    let joined = levels.join("/");
    if topic.starts_with('/') {
        format!("/{}", joined)
    } else {
        joined
    }
}

pub(crate) fn validate_publish_topic(topic: &str) -> SchistResult<()> {
    if topic.is_empty() {
        error!("Publish topic validation - empty topic");
        return Err(SchistError::new_invalid_argument("publish topic must not be empty"));
    }

    if topic.len() > MAXIMUM_STRING_LENGTH {
        error!("Publish topic validation - topic length {} too long", topic.len());
        return Err(SchistError::new_invalid_argument("publish topic is longer than 65535 bytes"));
    }

    if topic.contains(['+', '#']) {
        error!("Publish topic validation - topic contains a wildcard");
        return Err(SchistError::new_invalid_argument("publish topic must not contain wildcards"));
    }

    Ok(())
}

pub(crate) fn validate_subscription_filter(filter: &str) -> SchistResult<()> {
    if filter.is_empty() {
        error!("Topic filter validation - empty filter");
        return Err(SchistError::new_invalid_argument("topic filter must not be empty"));
    }

    if filter.len() > MAXIMUM_STRING_LENGTH {
        error!("Topic filter validation - filter length {} too long", filter.len());
        return Err(SchistError::new_invalid_argument("topic filter is longer than 65535 bytes"));
    }

    let levels : Vec<&str> = filter.split('/').collect();
    let last_index = levels.len() - 1;
    for (index, level) in levels.iter().enumerate() {
        if level.contains('+') && *level != "+" {
            error!("Topic filter validation - '+' does not occupy a whole level in \"{}\"", filter);
            return Err(SchistError::new_invalid_argument("single level wildcard must occupy an entire topic level"));
        }

        if level.contains('#') && (*level != "#" || index != last_index) {
            error!("Topic filter validation - misplaced '#' in \"{}\"", filter);
            return Err(SchistError::new_invalid_argument("multi level wildcard must be the entire last topic level"));
        }
    }

    Ok(())
}

/// Returns true if `topic` is matched by the subscription filter `sub`.
///
/// Both arguments are normalized first.  `+` matches exactly one non-empty level, `#` matches any
/// number of trailing levels (including none, so `foo/#` matches `foo`).  A `#` anywhere other
/// than the whole final level never matches.
pub fn topic_matches_sub(sub: &str, topic: &str) -> bool {
    let sub = normalize_topic(sub);
    let topic = normalize_topic(topic);
    if sub.is_empty() || topic.is_empty() {
        return false;
    }

    let sub_levels : Vec<&str> = sub.split('/').collect();
    let topic_levels : Vec<&str> = topic.split('/').collect();

    let mut topic_index = 0;
    for (sub_index, sub_level) in sub_levels.iter().enumerate() {
        if *sub_level == "#" {
            return sub_index == sub_levels.len() - 1;
        }

        if sub_level.contains('#') {
            return false;
        }

        let Some(topic_level) = topic_levels.get(topic_index) else {
            return false;
        };

        if *sub_level == "+" {
            if topic_level.is_empty() {
                return false;
            }
        } else if sub_level.contains('+') || sub_level != topic_level {
            return false;
        }

        topic_index += 1;
    }

    topic_index == topic_levels.len()
}
