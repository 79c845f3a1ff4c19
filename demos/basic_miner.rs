use stratum_client::{Connection, ConnectionConfig, ConnectionParams, JobResult};
use std::error::Error;
use tokio::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let host = std::env::var("POOL_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port = std::env::var("POOL_PORT")
        .ok()
        .and_then(|p| p.parse::<u16>().ok())
        .unwrap_or(3333);
    let username = std::env::var("POOL_USER").unwrap_or_else(|_| "test.worker1".to_string());
    let password = std::env::var("POOL_PASS").unwrap_or_else(|_| "x".to_string());

    println!("Connecting to stratum+tcp://{host}:{port}");

    let params = ConnectionParams::new(host, port, username.clone(), password);
    let connection = Connection::connect(params, ConnectionConfig::default()).await?;
    println!("Connected and authorized as {username}");

    let mut jobs = connection.watch_jobs();
    let mut shares_accepted = 0u64;
    let mut shares_rejected = 0u64;
    let mut extranonce2 = 0u64;

    loop {
        jobs.changed().await?;
        let Some(job_id) = jobs.borrow().clone() else {
            continue;
        };

        let job = connection.build_current_job(extranonce2).await?;
        extranonce2 += 1;
        println!("Job {job_id}: target word6 = {:#010x}", job.target[6]);

        let job_result = JobResult {
            worker_name: username.clone(),
            job_id: job.job_id.clone(),
            extranonce2: job.extranonce2,
            extranonce2_size: job.extranonce2_size,
            ntime: rand::random::<u32>(),
            nonce: rand::random::<u32>(),
        };

        match connection.submit(job_result).await {
            Ok(true) => {
                shares_accepted += 1;
                println!("Share accepted ({shares_accepted} accepted, {shares_rejected} rejected)");
            }
            Ok(false) => {
                shares_rejected += 1;
                println!("Share rejected ({shares_accepted} accepted, {shares_rejected} rejected)");
            }
            Err(e) => {
                eprintln!("Failed to submit share: {e}");
                shares_rejected += 1;
            }
        }

        tokio::time::sleep(Duration::from_millis(250)).await;
    }
}
