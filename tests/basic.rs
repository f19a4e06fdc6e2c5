use emberkv::*;
use std::sync::Arc;

fn dispatcher() -> Dispatcher {
    Dispatcher::new(Arc::new(Store::new(8)), None)
}

fn run(d: &Dispatcher, args: &[&str]) -> Value {
    d.handle(&Value::from_args(args.iter().copied()))
}

#[test]
fn set_get_del_cycle() {
    let d = dispatcher();
    assert_eq!(run(&d, &["SET", "foo", "bar"]), Value::ok());
    assert_eq!(run(&d, &["GET", "foo"]), Value::bulk("bar"));
    assert_eq!(run(&d, &["DEL", "foo"]), Value::Integer(1));
    assert_eq!(run(&d, &["GET", "foo"]), Value::null());
    assert_eq!(run(&d, &["DEL", "foo"]), Value::Integer(0));
}

#[test]
fn mset_then_mget_with_gap() {
    let d = dispatcher();
    assert_eq!(run(&d, &["MSET", "a", "1", "b", "2"]), Value::ok());
    assert_eq!(
        run(&d, &["MGET", "a", "b", "c"]),
        Value::array(vec![Value::bulk("1"), Value::bulk("2"), Value::null()])
    );
    assert_eq!(
        &run(&d, &["MGET", "a", "b", "c"]).encode()[..],
        b"*3\r\n$1\r\n1\r\n$1\r\n2\r\n$-1\r\n"
    );
}

#[test]
fn rename_missing_leaves_both_keys_absent() {
    let d = dispatcher();
    assert_eq!(run(&d, &["RENAME", "missing", "new"]), Value::error("ERR no such key"));
    assert_eq!(run(&d, &["GET", "missing"]), Value::null());
    assert_eq!(run(&d, &["GET", "new"]), Value::null());
}

#[test]
fn rename_moves_value() {
    let d = dispatcher();
    run(&d, &["SET", "x", "41"]);
    assert_eq!(run(&d, &["RENAME", "x", "y"]), Value::ok());
    assert_eq!(run(&d, &["EXISTS", "x", "y", "y"]), Value::Integer(2));
    assert_eq!(run(&d, &["GET", "y"]), Value::bulk("41"));
}

#[test]
fn incr_decr_counters() {
    let d = dispatcher();
    assert_eq!(run(&d, &["INCR", "n"]), Value::Integer(1));
    assert_eq!(run(&d, &["INCR", "n"]), Value::Integer(2));
    assert_eq!(run(&d, &["DECR", "n"]), Value::Integer(1));
    assert_eq!(run(&d, &["INCRBY", "n", "10"]), Value::Integer(11));
    assert_eq!(run(&d, &["DECRBY", "n", "20"]), Value::Integer(-9));
    assert_eq!(run(&d, &["GET", "n"]), Value::bulk("-9"));
}

#[test]
fn incr_on_text_fails_and_keeps_value() {
    let d = dispatcher();
    run(&d, &["SET", "s", "abc"]);
    assert_eq!(
        run(&d, &["INCR", "s"]),
        Value::error("ERR value is not an integer or out of range")
    );
    assert_eq!(run(&d, &["GET", "s"]), Value::bulk("abc"));
}

#[test]
fn setnx_only_first_wins() {
    let d = dispatcher();
    assert_eq!(run(&d, &["SETNX", "k", "1"]), Value::Integer(1));
    assert_eq!(run(&d, &["SETNX", "k", "2"]), Value::Integer(0));
    assert_eq!(run(&d, &["GET", "k"]), Value::bulk("1"));
}

#[test]
fn keys_and_flushall() {
    let d = dispatcher();
    run(&d, &["MSET", "user:1", "a", "user:2", "b", "other", "c"]);
    let mut keys = match run(&d, &["KEYS", "user:?"]) {
        Value::Array(Some(items)) => items,
        other => panic!("unexpected reply {:?}", other),
    };
    keys.sort_by(|a, b| a.as_bulk().cmp(&b.as_bulk()));
    assert_eq!(keys, vec![Value::bulk("user:1"), Value::bulk("user:2")]);

    assert!(run(&d, &["KEYS", "user:[1"]).is_error());
    assert_eq!(run(&d, &["DBSIZE"]), Value::Integer(3));
    assert_eq!(run(&d, &["FLUSHALL"]), Value::ok());
    assert_eq!(run(&d, &["DBSIZE"]), Value::Integer(0));
}

#[test]
fn admin_and_errors() {
    let d = dispatcher();
    assert_eq!(run(&d, &["PING"]), Value::simple("PONG"));
    assert_eq!(run(&d, &["ping", "hi"]), Value::bulk("hi"));
    assert_eq!(run(&d, &["COMMAND", "DOCS"]), Value::array(vec![]));
    assert_eq!(run(&d, &["BOGUS"]), Value::error("ERR unknown command 'BOGUS'"));
    assert_eq!(
        run(&d, &["GET"]),
        Value::error("ERR wrong number of arguments for 'get' command")
    );
    assert!(d.handle(&Value::simple("GET")).is_error());
}
