//! # Settings Dashboard Example
//!
//! This example walks through the flows of a payments dashboard:
//! - Queries held until the session is ready
//! - An optimistic settings update the server refuses, rolled back
//! - A deposit approval reconciled with the server value
//! - Dependent statistics refetched after the approval

use queryhaus::prelude::*;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Settings {
    fee: u32,
    currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Deposit {
    id: String,
    amount: u64,
    status: String,
}

/// Stand-in for the remote API
#[derive(Default)]
struct FakeApi {
    stats_calls: AtomicU32,
}

impl FakeApi {
    async fn settings(&self) -> anyhow::Result<Settings> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(Settings {
            fee: 100,
            currency: "BRL".to_string(),
        })
    }

    async fn update_settings(&self, settings: Settings) -> anyhow::Result<Settings> {
        tokio::time::sleep(Duration::from_millis(200)).await;
        anyhow::bail!("fee {} is above the contracted maximum", settings.fee)
    }

    async fn deposits(&self) -> anyhow::Result<Vec<Deposit>> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(vec![
            Deposit {
                id: "dep-1".to_string(),
                amount: 12_500,
                status: "pending".to_string(),
            },
            Deposit {
                id: "dep-2".to_string(),
                amount: 900,
                status: "approved".to_string(),
            },
        ])
    }

    async fn approve_deposit(&self, id: String) -> anyhow::Result<Vec<Deposit>> {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let mut deposits = self.deposits().await?;
        for deposit in deposits.iter_mut().filter(|d| d.id == id) {
            deposit.status = "approved".to_string();
        }
        Ok(deposits)
    }

    async fn deposit_stats(&self) -> anyhow::Result<serde_json::Value> {
        let call = self.stats_calls.fetch_add(1, Ordering::SeqCst);
        Ok(json!({ "pending": if call == 0 { 1 } else { 0 }, "approved": if call == 0 { 1 } else { 2 } }))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("🚀 QueryHaus Settings Dashboard Example");
    println!("======================================");

    let client = QueryHaus::new(AppConfig::default())?;
    client.register_resource(ResourceDescriptor::new("settings").requires_readiness())?;
    client.register_resource(
        ResourceDescriptor::new("deposits")
            .requires_readiness()
            .dependent("deposits-stats"),
    )?;
    client.register_resource(ResourceDescriptor::new("deposits-stats").requires_readiness())?;

    client.signals().add_callback(|notice: &Notice| {
        println!("   🔔 [{}] {}", notice.severity, notice.message);
    });

    let api = Arc::new(FakeApi::default());

    // 1. Readiness gating
    println!("\n🔐 Waiting for the session");
    println!("---------------------------");

    let settings_api = api.clone();
    let mut settings = client.use_query::<Settings>(
        CacheKey::of("settings"),
        fetcher(move || {
            let api = settings_api.clone();
            async move { api.settings().await }
        }),
        QueryOptions::default(),
    );
    let deposits_api = api.clone();
    let mut deposits = client.use_query::<Vec<Deposit>>(
        CacheKey::of("deposits"),
        fetcher(move || {
            let api = deposits_api.clone();
            async move { api.deposits().await }
        }),
        QueryOptions::default(),
    );
    let stats_api = api.clone();
    let mut stats = client.use_query::<serde_json::Value>(
        CacheKey::of("deposits-stats"),
        fetcher(move || {
            let api = stats_api.clone();
            async move { api.deposit_stats().await }
        }),
        QueryOptions::default(),
    );

    tokio::time::sleep(Duration::from_millis(20)).await;
    println!("   settings status before login: {}", settings.state()?.status);

    client.readiness().set(true);
    settings.wait_until(|e| e.status() == EntryStatus::Success).await;
    deposits.wait_until(|e| e.status() == EntryStatus::Success).await;
    stats.wait_until(|e| e.status() == EntryStatus::Success).await;
    println!("✅ Session ready, settings: {:?}", settings.state()?.value);

    // 2. Optimistic update rolled back
    println!("\n⚙️  Raising the fee");
    println!("-------------------");

    let update_api = api.clone();
    let update_settings = client.use_mutation(
        move |settings: Settings| {
            let api = update_api.clone();
            async move { api.update_settings(settings).await }
        },
        |settings: &Settings| {
            let fee = settings.fee;
            MutationOptions::new("Settings update")
                .target(CacheKey::of("settings"))
                .optimistic_typed(move |current: Option<Settings>| {
                    current.map(|s| Settings { fee, ..s })
                })
                .with_server_value()
        },
    );

    let pending = update_settings.mutate(Settings {
        fee: 150,
        currency: "BRL".to_string(),
    });
    println!(
        "   optimistic fee: {:?} (in flight: {})",
        settings.state()?.value.map(|s| s.fee),
        update_settings.is_in_flight()
    );
    if let Err(error) = pending.await {
        println!("   ❌ {}", error);
    }
    println!("   fee after rollback: {:?}", settings.state()?.value.map(|s| s.fee));

    // 3. Deposit approval
    println!("\n💰 Approving a deposit");
    println!("----------------------");

    let approve_api = api.clone();
    let approved = client
        .mutate(
            move || async move { approve_api.approve_deposit("dep-1".to_string()).await },
            MutationOptions::new("Deposit approval")
                .target(CacheKey::of("deposits"))
                .optimistic(|current| {
                    let mut list = current.cloned()?;
                    for deposit in list.as_array_mut()? {
                        if deposit["id"] == "dep-1" {
                            deposit["status"] = json!("approved");
                        }
                    }
                    Some(list)
                })
                .with_server_value()
                .invalidates("deposits-stats")
                .success_message("Deposit dep-1 approved"),
        )
        .await?;

    println!("   server says: {:?}", approved);
    println!("   stats after refetch: {:?}", stats.state()?.value);
    println!("   notices: {:?}", client.signals().stats());

    client.shutdown();
    println!("\n🎉 Done");
    Ok(())
}
