use std::sync::{Arc, Mutex};
use std::time::Duration;

use wampcore::auth::{CraCredentials, CraSalt, StaticAuthProvider};
use wampcore::client::Connection;
use wampcore::{ArgList, CallResult, Dict, List, MatchingPolicy, Reason, Router, Value, URI};

async fn wait_for_listener() {
    tokio::time::sleep(Duration::from_millis(200)).await;
}

fn add_callback(args: List, _kwargs: Dict) -> CallResult<(Option<List>, Option<Dict>)> {
    args.verify_len(2)?;
    let a = args.get_int(0)?.unwrap();
    let b = args.get_int(1)?.unwrap();
    Ok((Some(vec![Value::Integer(a + b)]), None))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn register_call_unregister_roundtrip() {
    let mut router = Router::new();
    router.add_realm("test.realm");
    let _listener = router.listen("127.0.0.1:18901");
    wait_for_listener().await;

    let connection = Connection::new("ws://127.0.0.1:18901/ws", "test.realm");
    let mut client = connection.connect().unwrap();

    let registration = client
        .register(URI::new("ca.test.add"), Box::new(add_callback))
        .await
        .unwrap();

    let (results, _kwargs) = client
        .call(
            URI::new("ca.test.add"),
            Some(vec![Value::Integer(2), Value::Integer(3)]),
            None,
        )
        .await
        .unwrap();
    assert_eq!(results, vec![Value::Integer(5)]);

    client.unregister(registration).await.unwrap();

    let err = client
        .call(URI::new("ca.test.add"), None, None)
        .await
        .unwrap_err();
    assert_eq!(*err.get_reason(), Reason::NoSuchProcedure);

    client.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn duplicate_registration_is_rejected() {
    let mut router = Router::new();
    router.add_realm("test.realm");
    let _listener = router.listen("127.0.0.1:18902");
    wait_for_listener().await;

    let connection = Connection::new("ws://127.0.0.1:18902/ws", "test.realm");
    let mut first = connection.connect().unwrap();
    let mut second = Connection::new("ws://127.0.0.1:18902/ws", "test.realm")
        .connect()
        .unwrap();

    first
        .register(URI::new("ca.test.dup"), Box::new(add_callback))
        .await
        .unwrap();

    let err = second
        .register(URI::new("ca.test.dup"), Box::new(add_callback))
        .await
        .unwrap_err();
    assert_eq!(*err.get_reason(), Reason::ProcedureAlreadyExists);

    first.shutdown().await.unwrap();
    second.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pubsub_fans_out_to_subscribers() {
    let mut router = Router::new();
    router.add_realm("test.realm");
    let _listener = router.listen("127.0.0.1:18903");
    wait_for_listener().await;

    let connection = Connection::new("ws://127.0.0.1:18903/ws", "test.realm");
    let mut subscriber = connection.connect().unwrap();
    let mut publisher = Connection::new("ws://127.0.0.1:18903/ws", "test.realm")
        .connect()
        .unwrap();

    let received = Arc::new(Mutex::new(Vec::new()));
    let received_clone = Arc::clone(&received);
    subscriber
        .subscribe(
            URI::new("ca.test.topic"),
            Box::new(move |args, _kwargs| {
                received_clone.lock().unwrap().push(args);
            }),
        )
        .await
        .unwrap();

    publisher
        .publish_and_acknowledge(
            URI::new("ca.test.topic"),
            Some(vec![Value::String("hello".to_string())]),
            None,
        )
        .await
        .unwrap();

    // Give the router a moment to fan the EVENT out to the subscriber.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let received = received.lock().unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0], vec![Value::String("hello".to_string())]);

    subscriber.shutdown().await.unwrap();
    publisher.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn wamp_cra_auth_succeeds_with_right_secret() {
    let mut router = Router::new();
    let mut users = StaticAuthProvider::new();
    users.add_user(
        "peter",
        CraCredentials {
            secret: "secret2".to_string(),
            salt: Some(CraSalt {
                salt: "saltxx".to_string(),
                iterations: 1500,
                keylen: 32,
            }),
            authrole: "user".to_string(),
        },
    );
    router.add_realm_with_auth("secure.realm", Arc::new(users));
    let _listener = router.listen("127.0.0.1:18904");
    wait_for_listener().await;

    let connection = Connection::new("ws://127.0.0.1:18904/ws", "secure.realm").with_credentials(
        "peter",
        CraCredentials {
            secret: "secret2".to_string(),
            salt: Some(CraSalt {
                salt: "saltxx".to_string(),
                iterations: 1500,
                keylen: 32,
            }),
            authrole: "user".to_string(),
        },
    );
    let mut client = connection.connect().unwrap();
    client.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn wamp_cra_auth_fails_with_wrong_secret() {
    let mut router = Router::new();
    let mut users = StaticAuthProvider::new();
    users.add_user(
        "peter",
        CraCredentials {
            secret: "secret2".to_string(),
            salt: None,
            authrole: "user".to_string(),
        },
    );
    router.add_realm_with_auth("secure.realm2", Arc::new(users));
    let _listener = router.listen("127.0.0.1:18905");
    wait_for_listener().await;

    let connection = Connection::new("ws://127.0.0.1:18905/ws", "secure.realm2").with_credentials(
        "peter",
        CraCredentials {
            secret: "wrong-secret".to_string(),
            salt: None,
            authrole: "user".to_string(),
        },
    );
    assert!(connection.connect().is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn registration_is_dropped_when_callee_disconnects() {
    let mut router = Router::new();
    router.add_realm("test.realm");
    let _listener = router.listen("127.0.0.1:18906");
    wait_for_listener().await;

    let connection = Connection::new("ws://127.0.0.1:18906/ws", "test.realm");
    let mut callee = connection.connect().unwrap();
    let mut caller = Connection::new("ws://127.0.0.1:18906/ws", "test.realm")
        .connect()
        .unwrap();

    callee
        .register(URI::new("ca.test.goes_away"), Box::new(add_callback))
        .await
        .unwrap();

    // Disconnect the callee without unregistering; the router must clean up
    // the dangling registration on its own rather than leaving it routable.
    callee.shutdown().await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let err = caller
        .call(URI::new("ca.test.goes_away"), None, None)
        .await
        .unwrap_err();
    assert_eq!(*err.get_reason(), Reason::NoSuchProcedure);

    caller.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unsubscribe_stops_delivery() {
    let mut router = Router::new();
    router.add_realm("test.realm");
    let _listener = router.listen("127.0.0.1:18907");
    wait_for_listener().await;

    let connection = Connection::new("ws://127.0.0.1:18907/ws", "test.realm");
    let mut subscriber = connection.connect().unwrap();
    let mut publisher = Connection::new("ws://127.0.0.1:18907/ws", "test.realm")
        .connect()
        .unwrap();

    let received = Arc::new(Mutex::new(0));
    let received_clone = Arc::clone(&received);
    let subscription = subscriber
        .subscribe_with_pattern(
            URI::new("ca.test.prefix"),
            Box::new(move |_args, _kwargs| {
                *received_clone.lock().unwrap() += 1;
            }),
            MatchingPolicy::Prefix,
        )
        .await
        .unwrap();

    subscriber.unsubscribe(subscription).await.unwrap();

    publisher
        .publish_and_acknowledge(URI::new("ca.test.prefix.child"), None, None)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(*received.lock().unwrap(), 0);

    subscriber.shutdown().await.unwrap();
    publisher.shutdown().await.unwrap();
}
