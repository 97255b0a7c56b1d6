use log::info;

use wampcore::router::Router;

fn main() {
    env_logger::init();
    let mut router = Router::new();
    router.add_realm("turnpike.examples");
    info!("Router listening");
    let child = router.listen("127.0.0.1:8090");
    child.join().unwrap();
}
