use bytes::{Bytes, BytesMut};
use redis_shard::command::{flatten, is_restricted_command, is_write_command};
use redis_shard::{Arg, Command};

fn encoded(command: &Command) -> String {
    let mut buf = BytesMut::new();
    command.encode(&mut buf);
    String::from_utf8(buf.to_vec()).unwrap()
}

#[test]
fn test_encode_commands() {
    let test_cases = vec![
        (Command::new("ping", vec![]), "*1\r\n$4\r\nPING\r\n"),
        (
            Command::new("get", vec!["user:42".into()]),
            "*2\r\n$3\r\nGET\r\n$7\r\nuser:42\r\n",
        ),
        (
            Command::new("SETEX", vec!["k".into(), 30.into(), "v".into()]),
            "*4\r\n$5\r\nSETEX\r\n$1\r\nk\r\n$2\r\n30\r\n$1\r\nv\r\n",
        ),
        (
            Command::new("SET", vec!["k".into(), "".into()]),
            "*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$0\r\n\r\n",
        ),
        (
            Command::new(
                "SADD",
                vec!["s".into(), Arg::Nested(vec!["a".into(), vec!["b", "c"].into()])],
            ),
            "*5\r\n$4\r\nSADD\r\n$1\r\ns\r\n$1\r\na\r\n$1\r\nb\r\n$1\r\nc\r\n",
        ),
        (
            Command::new("DEL", vec![Arg::from(Vec::<&str>::new()), "k".into()]),
            "*2\r\n$3\r\nDEL\r\n$1\r\nk\r\n",
        ),
    ];

    for (command, expected) in test_cases {
        assert_eq!(encoded(&command), expected, "command {:?}", command);
        assert_eq!(
            command.wire_len(),
            expected[1..expected.find('\r').unwrap()].parse::<usize>().unwrap()
        );
    }
}

#[test]
fn test_encode_binary_argument() {
    let command = Command::new("SET", vec!["k".into(), Arg::from(&b"a\r\nb"[..])]);

    let mut buf = BytesMut::new();
    command.encode(&mut buf);

    assert_eq!(&buf[..], &b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$4\r\na\r\nb\r\n"[..]);
}

#[test]
fn test_flatten_deep_nesting() {
    let mut arg = Arg::from("leaf");
    for _ in 0..1000 {
        arg = Arg::Nested(vec![arg]);
    }
    let args = vec!["key".into(), arg];

    let scalars = flatten(&args);

    assert_eq!(scalars, vec![&Bytes::from("key"), &Bytes::from("leaf")]);
}

#[test]
fn test_first_key() {
    let test_cases = vec![
        (Command::new("GET", vec!["k".into()]), Some("k")),
        (
            Command::new("DEL", vec![vec!["a", "b"].into(), "c".into()]),
            Some("a"),
        ),
        (Command::new("DEL", vec![Arg::Nested(vec![])]), None),
        (Command::new("TIME", vec![]), None),
    ];

    for (command, expected) in test_cases {
        assert_eq!(
            command.first_key().map(|k| k.as_ref()),
            expected.map(str::as_bytes),
            "command {:?}",
            command
        );
    }
}

#[test]
fn test_verb_classification() {
    let test_cases = vec![
        ("GET", false, false),
        ("get", false, false),
        ("HGETALL", false, false),
        ("SET", true, false),
        ("del", true, false),
        ("EVAL", true, false),
        ("SOMEFUTURECOMMAND", true, false),
        ("FLUSHALL", true, true),
        ("flushdb", true, true),
        ("PING", false, true),
        ("MULTI", false, true),
        ("SCAN", false, true),
        ("CONFIG", true, true),
    ];

    for (verb, write, restricted) in test_cases {
        assert_eq!(is_write_command(verb), write, "write {}", verb);
        assert_eq!(is_restricted_command(verb), restricted, "restricted {}", verb);
    }
}

#[test]
fn test_describe() {
    let command = Command::new(
        "zadd",
        vec!["scores".into(), 1.5.into(), vec!["m1", "m2"].into()],
    );

    assert_eq!(command.verb(), "ZADD");
    assert_eq!(command.describe(), "ZADD scores 1.5 array");
}

#[test]
fn test_args_from_iterator() {
    let arg: Arg = (1..=3).collect();

    assert_eq!(
        arg,
        Arg::Nested(vec![
            Arg::Bulk(Bytes::from("1")),
            Arg::Bulk(Bytes::from("2")),
            Arg::Bulk(Bytes::from("3")),
        ])
    );
}
