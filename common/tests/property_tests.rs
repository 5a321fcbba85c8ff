// Property-based tests for schedule matching, interpolation, and parsing

use chrono::TimeZone as _;
use chrono::Utc;
use common::schedule::CronExpr;
use common::substitution::EnvInterpolator;
use common::taskfile;
use proptest::prelude::*;
use std::collections::HashMap;

// For any minute m, the expression "m * * * *" matches exactly the instants
// whose minute is m, regardless of seconds.
proptest! {
    #[test]
    fn prop_fixed_minute_matches_only_that_minute(
        minute in 0u32..60u32,
        probe in 0u32..60u32,
        second in 0u32..60u32,
    ) {
        let expr: CronExpr = format!("{} * * * *", minute).parse().unwrap();
        let at = Utc.with_ymd_and_hms(2026, 6, 15, 12, probe, second).unwrap();
        prop_assert_eq!(expr.matches_at(at), probe == minute);
    }
}

// A minute list matches exactly its members.
proptest! {
    #[test]
    fn prop_minute_list_matches_members(
        minutes in proptest::collection::btree_set(0u32..60u32, 1..5),
        probe in 0u32..60u32,
    ) {
        let list = minutes
            .iter()
            .map(|m| m.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let expr: CronExpr = format!("{} * * * *", list).parse().unwrap();
        let at = Utc.with_ymd_and_hms(2026, 6, 15, 12, probe, 0).unwrap();
        prop_assert_eq!(expr.matches_at(at), minutes.contains(&probe));
    }
}

// Interpolating a single reference yields exactly the variable's value.
proptest! {
    #[test]
    fn prop_interpolation_substitutes_value(
        value in "[a-zA-Z0-9/_.-]{1,40}",
    ) {
        let interp = EnvInterpolator::new().unwrap();
        let mut env = HashMap::new();
        env.insert("SKA".to_string(), value.clone());

        let result = interp.interpolate("$ENV{SKA}/data/twiki-wg", &env).unwrap();
        prop_assert_eq!(result, format!("{}/data/twiki-wg", value));
    }
}

// A template with no references is returned unchanged for any environment.
proptest! {
    #[test]
    fn prop_interpolation_without_references_is_identity(
        template in "[a-zA-Z0-9 _./:-]{0,60}",
        key in "[A-Z]{1,8}",
        value in "[a-z]{0,12}",
    ) {
        let interp = EnvInterpolator::new().unwrap();
        let mut env = HashMap::new();
        env.insert(key, value);

        let result = interp.interpolate(&template, &env).unwrap();
        prop_assert_eq!(result, template);
    }
}

// Numeric task settings survive the parser unchanged.
proptest! {
    #[test]
    fn prop_task_timeout_round_trips(timeout in 1u64..100_000u64) {
        let content = format!(
            "data_dir /tmp\ntask t {{\n    exec true\n    timeout {}\n}}\n",
            timeout
        );
        let file = taskfile::parse(&content, &HashMap::new()).unwrap();
        prop_assert_eq!(file.tasks[0].timeout_seconds, Some(timeout));
    }
}

// The parser preserves exec order for any number of commands.
proptest! {
    #[test]
    fn prop_exec_order_is_preserved(count in 1usize..10usize) {
        let mut content = String::from("data_dir /tmp\ntask ordered {\n");
        for i in 0..count {
            content.push_str(&format!("    exec echo step-{}\n", i));
        }
        content.push_str("}\n");

        let file = taskfile::parse(&content, &HashMap::new()).unwrap();
        let commands = &file.tasks[0].commands;
        prop_assert_eq!(commands.len(), count);
        for (i, command) in commands.iter().enumerate() {
            let expected = format!("echo step-{}", i);
            prop_assert_eq!(command.as_str(), expected.as_str());
        }
    }
}

// Serialized cron expressions deserialize back to an equal expression.
proptest! {
    #[test]
    fn prop_cron_serde_round_trip(minute in 0u32..60u32, hour in 0u32..24u32) {
        let expr: CronExpr = format!("{} {} * * *", minute, hour).parse().unwrap();
        let json = serde_json::to_string(&expr).unwrap();
        let back: CronExpr = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(back, expr);
    }
}
