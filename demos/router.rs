use std::sync::Arc;

use log::info;

use wampcore::auth::{CraCredentials, StaticAuthProvider};
use wampcore::router::Router;

fn main() {
    env_logger::init();
    let mut router = Router::new();
    router.add_realm("kitchen_realm");

    let mut users = StaticAuthProvider::new();
    users.add_user(
        "peter",
        CraCredentials {
            secret: "secret2".to_string(),
            salt: None,
            authrole: "user".to_string(),
        },
    );
    router.add_realm_with_auth("secure_realm", Arc::new(users));

    info!("Router listening");
    let child = router.listen("127.0.0.1:8090");
    child.join().unwrap();
}
