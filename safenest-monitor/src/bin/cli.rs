//! Command-line interface for safenest-monitord.
//!
//! This binary provides a CLI for controlling and monitoring the fall
//! detection daemon via the HTTP API.

use std::env;

use anyhow::Result;

use safenest_monitor::api_client;
use safenest_monitor::api_client::types::MonitorState;
use safenest_monitor::app_event::AppEvent;

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: safenest-cli <command>");
        eprintln!();
        eprintln!("Commands:");
        eprintln!("  status    Show monitor status");
        eprintln!("  start     Start fall detection");
        eprintln!("  stop      Stop fall detection");
        eprintln!("  ack       Confirm you're okay after a check-in");
        eprintln!("  sos       Send a manual SOS");
        eprintln!("  events    Drain pending app-layer events");
        eprintln!();
        eprintln!("Environment:");
        eprintln!("  SAFENEST_API_URL    API base URL (default: http://127.0.0.1:7786)");
        std::process::exit(1);
    }

    let command = &args[1];
    let client = make_client();

    match command.as_str() {
        "status" => print_state(&client.get_monitor().await?),
        "start" => print_state(&client.start().await?),
        "stop" => print_state(&client.stop().await?),
        "ack" => {
            if client.acknowledge().await? {
                println!("Check-in acknowledged, escalation cancelled");
            } else {
                println!("No check-in was open");
            }
        }
        "sos" => {
            client.trigger_sos().await?;
            println!("SOS queued");
        }
        "events" => cmd_events(&client).await?,
        _ => {
            eprintln!("Unknown command: {}", command);
            eprintln!("Run without arguments to see usage.");
            std::process::exit(1);
        }
    }

    Ok(())
}

/// Build an API client, honoring SAFENEST_API_URL if set.
fn make_client() -> api_client::Client {
    match env::var("SAFENEST_API_URL") {
        Ok(url) => api_client::Client::with_base_url(url),
        Err(_) => api_client::Client::new(),
    }
}

fn print_state(state: &MonitorState) {
    println!("Monitoring: {}", if state.monitoring { "on" } else { "off" });
    println!("Phase:      {:?}", state.phase);
    println!("Sensor:     {:?}", state.sensor);
    match state.sampling_rate {
        Some(rate) => println!("Rate:       {} ({} Hz)", rate, rate.hz()),
        None => println!("Rate:       -"),
    }
    if state.escalation_pending {
        println!("Escalation: pending");
    }
    println!(
        "Impacts: {}  Escalations: {}  Acknowledged: {}",
        state.stats.impacts, state.stats.escalations, state.stats.acknowledgements
    );
    if state.stats.failed_deliveries > 0 || state.dropped_samples > 0 {
        println!(
            "Failed deliveries: {}  Dropped samples: {}",
            state.stats.failed_deliveries, state.dropped_samples
        );
    }
}

async fn cmd_events(client: &api_client::Client) -> Result<()> {
    let events = client.drain_events().await?;

    if events.is_empty() {
        println!("No pending events");
    }
    for event in &events {
        match event {
            AppEvent::FallDetected { escalated } => {
                println!("{} (escalated: {})", event.name(), escalated)
            }
            AppEvent::WidgetSos => println!("{}", event.name()),
        }
    }

    Ok(())
}
