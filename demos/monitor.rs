use std::env;
use std::time::Duration;

use flo_water::{FloGateway, FloSession};

#[tokio::main]
async fn main() -> flo_water::Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    let username = args.get(1).expect("usage: monitor <username> <password>");
    let password = args.get(2).expect("usage: monitor <username> <password>");

    let session = FloSession::new(FloGateway::builder(username.as_str(), password.as_str()).build());

    println!("Authenticating...");
    session.gateway().connect().await?;
    println!("Connected. Polling for updates...");

    let coordinator = session.coordinator(vec![]);
    loop {
        match coordinator.refresh().await {
            Ok(stats) => {
                for location in session.gateway().locations().await? {
                    println!(
                        "{} ({} devices)",
                        location.nickname.as_deref().unwrap_or(&location.id),
                        location.device_ids.len(),
                    );
                    for device_id in &location.device_ids {
                        if let Some(snapshot) = session.cache().get(device_id)
                            && let Some(device) = snapshot.as_device()
                            && let Some(ref telemetry) = device.telemetry
                        {
                            println!(
                                "  [{}] {:.1} gpm | {:.1} psi | {:.1}\u{00b0}F | valve: {}",
                                device.nickname.as_deref().unwrap_or(&device.id),
                                telemetry.gpm.unwrap_or(0.0),
                                telemetry.psi.unwrap_or(0.0),
                                telemetry.temp_f.unwrap_or(0.0),
                                device.valve.resolved().map_or("unknown", |v| v.as_api_str()),
                            );
                        }
                    }
                }
                if stats.failures > 0 {
                    eprintln!("{} device(s) failed to refresh", stats.failures);
                }
            }
            Err(e) => eprintln!("Poll error: {e}"),
        }
        tokio::time::sleep(Duration::from_secs(30)).await;
    }
}
