use oca_locator::OcaLocator;

/// Fetch a fresh fast.com token, then locate one known OCA hostname directly.
#[tokio::main]
async fn main() {
    let locator = OcaLocator::new().unwrap();
    let token = locator.token().await.unwrap();
    println!("token: {}", token);

    let records = locator
        .locate_hostnames(&["ipv4-c001-ord001-ix.1.oca.nflxvideo.net".to_string()])
        .await;
    for record in records {
        println!("{}", record);
    }
}
