#[actix_web::main]
async fn main() {
    if let Err(e) = dbchat_lib::run().await {
        eprintln!("dbchat: {}", e);
        std::process::exit(1);
    }
}
