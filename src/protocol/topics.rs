//! Topic construction, topic filter matching and thing name validation
//!
//! Shadow and jobs topics live under `<topic_root>/<thing>`; the heartbeat topic
//! lives under its own prefix so fleet dashboards can subscribe to it directly.

use thiserror::Error;

const MAX_THING_NAME_LEN: usize = 128;

/// Builds every topic a device publishes to or subscribes on
#[derive(Debug, Clone, PartialEq)]
pub struct TopicBuilder {
    root: String,
    thing_name: String,
    heartbeat_prefix: String,
    shadow_name: Option<String>,
}

impl TopicBuilder {
    pub fn new(
        topic_root: &str,
        thing_name: &str,
        heartbeat_prefix: &str,
        shadow_name: Option<&str>,
    ) -> Self {
        Self {
            root: format!("{}/{}", topic_root.trim_end_matches('/'), thing_name),
            thing_name: thing_name.to_string(),
            heartbeat_prefix: heartbeat_prefix.trim_end_matches('/').to_string(),
            shadow_name: shadow_name.map(str::to_string),
        }
    }

    /// Builder with the AWS IoT default root and the demo heartbeat prefix
    pub fn aws(thing_name: &str) -> Self {
        Self::new("$aws/things", thing_name, "demofleet", None)
    }

    pub fn thing_name(&self) -> &str {
        &self.thing_name
    }

    fn shadow_base(&self) -> String {
        match &self.shadow_name {
            Some(name) => format!("{}/shadow/name/{}", self.root, name),
            None => format!("{}/shadow", self.root),
        }
    }

    pub fn shadow_update(&self) -> String {
        format!("{}/update", self.shadow_base())
    }

    pub fn shadow_update_accepted(&self) -> String {
        format!("{}/update/accepted", self.shadow_base())
    }

    pub fn job_list(&self) -> String {
        format!("{}/jobs/get", self.root)
    }

    pub fn job_list_accepted(&self) -> String {
        format!("{}/jobs/get/accepted", self.root)
    }

    pub fn job_detail(&self, job_id: &str) -> String {
        format!("{}/jobs/{}/get", self.root, job_id)
    }

    /// Wildcard filter matching the accepted reply of every job detail request
    pub fn job_detail_accepted_filter(&self) -> String {
        format!("{}/jobs/+/get/accepted", self.root)
    }

    pub fn job_status(&self, job_id: &str) -> String {
        format!("{}/jobs/{}/update", self.root, job_id)
    }

    pub fn job_notify(&self) -> String {
        format!("{}/jobs/notify", self.root)
    }

    pub fn heartbeat(&self) -> String {
        format!("{}/{}/heartbeat", self.heartbeat_prefix, self.thing_name)
    }

    /// Extract the job id from a `<root>/jobs/<jobId>/get/accepted` topic
    pub fn job_id_from_detail_topic<'a>(&self, topic: &'a str) -> Option<&'a str> {
        let rest = topic.strip_prefix(self.root.as_str())?;
        let job_id = rest.strip_prefix("/jobs/")?.strip_suffix("/get/accepted")?;
        if job_id.is_empty() || job_id.contains('/') {
            return None;
        }
        Some(job_id)
    }
}

/// Check a topic against an MQTT topic filter with `+` and `#` wildcards
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Validate a thing name: non-empty, at most 128 of `[a-zA-Z0-9:_-]`
pub fn validate_thing_name(thing_name: &str) -> Result<(), ValidationError> {
    if thing_name.is_empty() {
        return Err(ValidationError::EmptyThingName);
    }

    let len = thing_name.chars().count();
    if len > MAX_THING_NAME_LEN {
        return Err(ValidationError::ThingNameTooLong(len));
    }

    for ch in thing_name.chars() {
        if !ch.is_ascii_alphanumeric() && ch != ':' && ch != '_' && ch != '-' {
            return Err(ValidationError::InvalidThingNameChar(ch));
        }
    }

    Ok(())
}

/// Validation errors for thing names
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Thing name cannot be empty")]
    EmptyThingName,
    #[error("Thing name is {0} characters, the limit is 128")]
    ThingNameTooLong(usize),
    #[error("Thing name contains invalid character: '{0}'")]
    InvalidThingNameChar(char),
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_classic_shadow_topics() {
        let topics = TopicBuilder::aws("sensor-1");
        assert_eq!(topics.shadow_update(), "$aws/things/sensor-1/shadow/update");
        assert_eq!(
            topics.shadow_update_accepted(),
            "$aws/things/sensor-1/shadow/update/accepted"
        );
    }

    #[test]
    fn test_named_shadow_topics() {
        let topics = TopicBuilder::new("$aws/things", "sensor-1", "demofleet", Some("telemetry"));
        assert_eq!(
            topics.shadow_update(),
            "$aws/things/sensor-1/shadow/name/telemetry/update"
        );
        assert_eq!(
            topics.shadow_update_accepted(),
            "$aws/things/sensor-1/shadow/name/telemetry/update/accepted"
        );
    }

    #[test]
    fn test_job_topics() {
        let topics = TopicBuilder::aws("sensor-1");
        assert_eq!(topics.job_list(), "$aws/things/sensor-1/jobs/get");
        assert_eq!(
            topics.job_list_accepted(),
            "$aws/things/sensor-1/jobs/get/accepted"
        );
        assert_eq!(topics.job_detail("j1"), "$aws/things/sensor-1/jobs/j1/get");
        assert_eq!(
            topics.job_detail_accepted_filter(),
            "$aws/things/sensor-1/jobs/+/get/accepted"
        );
        assert_eq!(topics.job_status("j1"), "$aws/things/sensor-1/jobs/j1/update");
        assert_eq!(topics.job_notify(), "$aws/things/sensor-1/jobs/notify");
    }

    #[test]
    fn test_heartbeat_topic() {
        assert_eq!(
            TopicBuilder::aws("sensor-1").heartbeat(),
            "demofleet/sensor-1/heartbeat"
        );
        let custom = TopicBuilder::new("local/things/", "dev", "fleet/", None);
        assert_eq!(custom.heartbeat(), "fleet/dev/heartbeat");
        assert_eq!(custom.job_list(), "local/things/dev/jobs/get");
    }

    #[test]
    fn test_job_id_from_detail_topic() {
        let topics = TopicBuilder::aws("sensor-1");
        assert_eq!(
            topics.job_id_from_detail_topic("$aws/things/sensor-1/jobs/job-42/get/accepted"),
            Some("job-42")
        );
        assert_eq!(
            topics.job_id_from_detail_topic("$aws/things/sensor-1/jobs/get/accepted"),
            None
        );
        assert_eq!(
            topics.job_id_from_detail_topic("$aws/things/other/jobs/job-42/get/accepted"),
            None
        );
    }

    #[test]
    fn test_topic_matching_examples() {
        assert!(topic_matches("a/b/c", "a/b/c"));
        assert!(topic_matches("a/+/c", "a/b/c"));
        assert!(topic_matches("a/#", "a/b/c"));
        assert!(topic_matches("a/#", "a"));
        assert!(topic_matches(
            "$aws/things/t/jobs/+/get/accepted",
            "$aws/things/t/jobs/job-1/get/accepted"
        ));

        assert!(!topic_matches("a/+/c", "a/b/d"));
        assert!(!topic_matches("a/+", "a/b/c"));
        assert!(!topic_matches("a/b/c", "a/b"));
        assert!(!topic_matches(
            "$aws/things/t/jobs/+/get/accepted",
            "$aws/things/t/jobs/get/accepted"
        ));
    }

    #[test]
    fn test_thing_name_validation_examples() {
        assert!(validate_thing_name("sensor-001").is_ok());
        assert!(validate_thing_name("fleet:sensor_1").is_ok());
        assert!(validate_thing_name(&"a".repeat(128)).is_ok());

        assert_eq!(validate_thing_name(""), Err(ValidationError::EmptyThingName));
        assert_eq!(
            validate_thing_name(&"a".repeat(129)),
            Err(ValidationError::ThingNameTooLong(129))
        );
        assert_eq!(
            validate_thing_name("sensor/1"),
            Err(ValidationError::InvalidThingNameChar('/'))
        );
        assert_eq!(
            validate_thing_name("sensor 1"),
            Err(ValidationError::InvalidThingNameChar(' '))
        );
        assert!(validate_thing_name("sensor#1").is_err());
        assert!(validate_thing_name("sensor.1").is_err());
    }

    proptest! {
        #[test]
        fn exact_filter_matches_itself(topic in "[a-z0-9]{1,8}(/[a-z0-9]{1,8}){0,5}") {
            prop_assert!(topic_matches(&topic, &topic));
        }

        #[test]
        fn multi_level_wildcard_matches_any_suffix(
            prefix in "[a-z]{1,8}",
            suffix in "[a-z0-9]{1,8}(/[a-z0-9]{1,8}){0,4}"
        ) {
            let filter = format!("{prefix}/#");
            let topic = format!("{prefix}/{suffix}");
            prop_assert!(topic_matches(&filter, &topic));
        }

        #[test]
        fn single_level_wildcard_spans_one_level(
            a in "[a-z]{1,8}",
            b in "[a-z0-9]{1,8}",
            c in "[a-z0-9]{1,8}"
        ) {
            let filter = format!("{a}/+");
            let one_level = format!("{a}/{b}");
            let two_levels = format!("{a}/{b}/{c}");
            prop_assert!(topic_matches(&filter, &one_level));
            prop_assert!(!topic_matches(&filter, &two_levels));
        }

        #[test]
        fn valid_thing_names_pass(name in "[a-zA-Z0-9:_-]{1,128}") {
            prop_assert!(validate_thing_name(&name).is_ok());
        }

        #[test]
        fn invalid_leading_char_fails(name in "[^a-zA-Z0-9:_-]{1}[a-zA-Z0-9:_-]{0,16}") {
            prop_assert!(validate_thing_name(&name).is_err());
        }
    }
}
