use clap::{Parser, Subcommand};
use polaris_core::{RegistryOverview, ServiceInstance};
use reqwest::{Client, StatusCode};
use serde_json::json;
use std::collections::HashMap;

#[derive(Parser)]
#[command(name = "polaris")]
#[command(about = "Polaris registry command-line client", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, env = "POLARIS_SERVER", default_value = "http://localhost:8761")]
    server: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a service instance
    Register {
        #[arg(long)]
        service: String,
        /// Generated when omitted
        #[arg(long)]
        instance: Option<String>,
        #[arg(long)]
        address: String,
        /// Metadata entries as key=value, repeatable
        #[arg(long = "meta", value_parser = parse_key_val)]
        metadata: Vec<(String, String)>,
    },
    /// Renew the lease for an instance
    Heartbeat {
        #[arg(long)]
        service: String,
        #[arg(long)]
        instance: String,
    },
    /// Cancel an instance's lease
    Cancel {
        #[arg(long)]
        service: String,
        #[arg(long)]
        instance: String,
    },
    /// List live instances for a service
    Discover {
        #[arg(long)]
        service: String,
    },
    /// List all registered services and instances
    Services,
    /// Show registry status overview
    Status,
}

fn parse_key_val(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))
}

fn print_instances(instances: &[ServiceInstance]) {
    println!("{:<20} {:<20} {:<25} {:<15}", "Service", "Instance", "Address", "Status");
    println!("{}", "-".repeat(80));
    for inst in instances {
        println!(
            "{:<20} {:<20} {:<25} {:<15}",
            inst.service_name,
            inst.instance_id,
            inst.address,
            format!("{:?}", inst.status)
        );
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let client = Client::new();
    let server = cli.server.trim_end_matches('/').to_string();

    match cli.command {
        Commands::Register { service, instance, address, metadata } => {
            let instance = instance.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let metadata: HashMap<_, _> = metadata.into_iter().collect();
            let res = client
                .put(format!("{server}/apps/{service}/{instance}"))
                .json(&json!({ "address": address, "metadata": metadata }))
                .send()
                .await?;
            match res.status() {
                StatusCode::NO_CONTENT => println!("Registered {service}/{instance} at {address}"),
                status => return Err(format!("registration failed: {status}: {}", res.text().await?).into()),
            }
        }
        Commands::Heartbeat { service, instance } => {
            let res = client
                .put(format!("{server}/apps/{service}/{instance}"))
                .send()
                .await?;
            match res.status() {
                StatusCode::OK => println!("Lease renewed for {service}/{instance}"),
                StatusCode::NOT_FOUND => {
                    return Err(format!("no lease for {service}/{instance}, re-register").into());
                }
                status => return Err(format!("heartbeat failed: {status}").into()),
            }
        }
        Commands::Cancel { service, instance } => {
            let res = client
                .delete(format!("{server}/apps/{service}/{instance}"))
                .send()
                .await?;
            match res.status() {
                StatusCode::OK => println!("Cancelled {service}/{instance}"),
                StatusCode::NOT_FOUND => return Err(format!("no lease for {service}/{instance}").into()),
                status => return Err(format!("cancel failed: {status}").into()),
            }
        }
        Commands::Discover { service } => {
            let res = client.get(format!("{server}/apps/{service}")).send().await?;
            if res.status() == StatusCode::NOT_FOUND {
                println!("No instances registered for {service}");
                return Ok(());
            }
            let instances: Vec<ServiceInstance> = res.error_for_status()?.json().await?;
            print_instances(&instances);
        }
        Commands::Services => {
            let res = client.get(format!("{server}/apps")).send().await?;
            let snapshot: HashMap<String, Vec<ServiceInstance>> =
                res.error_for_status()?.json().await?;
            let mut all: Vec<ServiceInstance> =
                snapshot.into_values().flatten().collect();
            all.sort_by(|a, b| {
                (&a.service_name, &a.instance_id).cmp(&(&b.service_name, &b.instance_id))
            });
            print_instances(&all);
        }
        Commands::Status => {
            let res = client.get(format!("{server}/status")).send().await?;
            let overview: RegistryOverview = res.error_for_status()?.json().await?;
            println!("Polaris Registry Status Overview");
            println!("{}", "=".repeat(35));
            println!("Services:              {}", overview.services);
            println!("Instances:             {}", overview.instances);
            println!("State:                 {:?}", overview.state);
            println!("Expected renewals/min: {:.1}", overview.expected_renewals_per_min);
            println!("Actual renewals/min:   {:.1}", overview.actual_renewals_per_min);
        }
    }

    Ok(())
}
