pub const TOPIC_AC_CONTROL: &str = "office/ac/control";
pub const TOPIC_SCHEDULE_ENABLED: &str = "office/ac/schedule/enabled";
pub const TOPIC_SCHEDULE_STATUS: &str = "office/ac/schedule/status";

/// Topics the bus worker subscribes to after every (re)connect.
pub const INBOUND_TOPICS: [&str; 2] = [TOPIC_AC_CONTROL, TOPIC_SCHEDULE_ENABLED];
