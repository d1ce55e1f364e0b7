#[rocket::launch]
fn rocket() -> _ {
    log::info!("starting Karma API server");
    karma_api::rocket()
}
