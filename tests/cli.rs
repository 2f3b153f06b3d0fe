use std::path::PathBuf;

use bytes::Bytes;
use redis_shard::cli::{format_reply, CliArgs, CliError};
use redis_shard::RespValue;

fn args(line: &str) -> Vec<String> {
    line.split_whitespace().map(str::to_string).collect()
}

#[test]
fn test_parse_command_line() {
    let test_cases = vec![
        (
            "redis-shard --config shards.json GET user:42",
            Ok(CliArgs {
                config_path: PathBuf::from("shards.json"),
                temp_hash: None,
                verb: "GET".to_string(),
                args: vec!["user:42".to_string()],
            }),
        ),
        (
            "redis-shard -c /etc/shards.json --temp-hash -x set k -1",
            Ok(CliArgs {
                config_path: PathBuf::from("/etc/shards.json"),
                temp_hash: Some("-x".to_string()),
                verb: "set".to_string(),
                args: vec!["k".to_string(), "-1".to_string()],
            }),
        ),
        (
            "redis-shard --temp-hash t --config c.json TIME",
            Ok(CliArgs {
                config_path: PathBuf::from("c.json"),
                temp_hash: Some("t".to_string()),
                verb: "TIME".to_string(),
                args: vec![],
            }),
        ),
        (
            "redis-shard --verbose --config c.json GET k",
            Err(CliError::InvalidCommandLineFlag("--verbose".to_string())),
        ),
        (
            "redis-shard GET k",
            Err(CliError::MissingConfig),
        ),
        (
            "redis-shard --config c.json",
            Err(CliError::MissingCommand),
        ),
        (
            "redis-shard --config",
            Err(CliError::MissingFlagValue("--config".to_string())),
        ),
        ("redis-shard", Err(CliError::MissingCommand)),
    ];

    for (line, expected) in test_cases {
        assert_eq!(CliArgs::parse(args(line)), expected, "line {:?}", line);
    }
}

#[test]
fn test_format_reply() {
    let test_cases = vec![
        (RespValue::Ok, "OK"),
        (RespValue::SimpleString("PONG".to_string()), "PONG"),
        (RespValue::Error("no such key".to_string()), "(error) no such key"),
        (RespValue::Integer(7), "(integer) 7"),
        (RespValue::BulkString(Bytes::from("alice")), "\"alice\""),
        (RespValue::Null, "(nil)"),
        (RespValue::NullArray, "(nil)"),
        (RespValue::Array(vec![]), "(empty array)"),
        (
            RespValue::Array(vec![
                RespValue::BulkString(Bytes::from("a")),
                RespValue::Integer(2),
            ]),
            "1) \"a\"\n2) (integer) 2",
        ),
        (
            RespValue::Array(vec![
                RespValue::Array(vec![RespValue::Ok, RespValue::Null]),
                RespValue::BulkString(Bytes::from("b")),
            ]),
            "1) 1) OK\n   2) (nil)\n2) \"b\"",
        ),
    ];

    for (value, expected) in test_cases {
        assert_eq!(format_reply(&value), expected, "value {:?}", value);
    }
}

#[test]
fn test_format_reply_pads_labels() {
    let items = (1..=10).map(RespValue::Integer).collect();

    let formatted = format_reply(&RespValue::Array(items));
    let lines: Vec<&str> = formatted.lines().collect();

    assert_eq!(lines.len(), 10);
    assert_eq!(lines[0], " 1) (integer) 1");
    assert_eq!(lines[9], "10) (integer) 10");
}
