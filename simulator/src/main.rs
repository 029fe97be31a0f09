mod telemetry;

use chrono::Utc;
use clap::Parser;
use rand::Rng;
use reqwest::StatusCode;
use std::time::Duration;
use telemetry::{Frame, Uplink};
use tracing::{debug, error, info, warn};

/// Posts synthetic device frames to the gateway webhook.
#[derive(Debug, Parser)]
#[command(name = "simulator")]
struct Args {
    /// Telemetry webhook URL
    #[arg(long, env = "GATEWAY_URL", default_value = "http://localhost:8080/device")]
    url: String,

    /// Pre-shared key sent in X-AuthKey
    #[arg(long, env = "DEVICE_KEY")]
    key: String,

    /// Messages per second across all devices
    #[arg(long, env = "RATE", default_value_t = 1)]
    rate: u64,

    /// Number of simulated devices
    #[arg(long, env = "DEVICES", default_value_t = 3)]
    devices: usize,

    /// Stop after this many messages (0 runs forever)
    #[arg(long, env = "COUNT", default_value_t = 0)]
    count: u64,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("Starting device simulator");
    info!("Target: {}, Rate: {} msg/s, Devices: {}", args.url, args.rate, args.devices);

    let client = match reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
    {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to build HTTP client: {}", e);
            std::process::exit(1);
        }
    };

    let interval = Duration::from_millis(1000 / args.rate.max(1));
    let mut rng = rand::thread_rng();
    let mut counter = 0u64;
    let mut voltages = vec![3.3f64; args.devices.max(1)];

    loop {
        let slot = (counter % voltages.len() as u64) as usize;
        let device_id = format!("SIM{:04X}", slot);

        // batteries drain slowly, with an occasional noisy reading
        voltages[slot] = (voltages[slot] - rng.gen_range(0.0..0.002)).max(1.8);
        let frame = generate_frame(&mut rng, voltages[slot]);

        let uplink = Uplink {
            device: device_id.clone(),
            ts: Utc::now().timestamp(),
            data: hex::encode(frame.encode()),
            ack: rng.gen_bool(0.5),
        };

        match client
            .post(&args.url)
            .header("X-AuthKey", &args.key)
            .json(&uplink)
            .send()
            .await
        {
            Ok(resp) if resp.status() == StatusCode::OK => {
                let body = resp.text().await.unwrap_or_default();
                debug!("{} acknowledged: {}", device_id, body);
            }
            Ok(resp) if resp.status().is_success() => {
                debug!("{} accepted", device_id);
            }
            Ok(resp) => warn!("{} rejected with {}", device_id, resp.status()),
            Err(e) => warn!("Failed to post frame for {}: {}", device_id, e),
        }

        counter += 1;
        if counter % 100 == 0 {
            info!("Posted {} frames", counter);
        }
        if args.count > 0 && counter >= args.count {
            info!("Done after {} frames", counter);
            break;
        }

        tokio::time::sleep(interval).await;
    }
}

fn generate_frame(rng: &mut impl Rng, voltage: f64) -> Frame {
    let temperature = if rng.gen_bool(0.05) {
        rng.gen_range(-9.0..60.0) // 5% outliers
    } else {
        rng.gen_range(15.0..30.0)
    };

    Frame {
        alarm: rng.gen_bool(0.02),
        info: rng.gen_bool(0.2),
        heartbeat: rng.gen_bool(0.3),
        door_open: rng.gen_bool(0.1),
        temperature,
        voltage,
    }
}
