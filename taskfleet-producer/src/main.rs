//! Task submission CLI: hash task names to partitions and append task ids to
//! the fleet's queues.

use clap::Parser;
use tracing::info;

use taskfleet_common::queue::{partition_queue, RedisQueue, TaskQueue, PARTITION_COUNT};

mod partition;

use partition::partition_for_task;

const DEFAULT_TASKS: [&str; 5] = [
    "process-image",
    "send-email",
    "generate-report",
    "calculate-stats",
    "cleanup-old-data",
];

#[derive(Parser, Debug)]
#[command(
    name = "taskfleet-producer",
    about = "Append task ids to the fleet's partitioned queues"
)]
struct Args {
    /// Number of task instances to enqueue.
    #[arg(long, default_value_t = 200)]
    count: usize,

    /// Task names to draw from; instances cycle through these.
    #[arg(long = "task")]
    tasks: Vec<String>,

    #[arg(long, default_value = "redis://localhost:6379")]
    redis_url: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let names: Vec<String> = if args.tasks.is_empty() {
        DEFAULT_TASKS.iter().map(|t| t.to_string()).collect()
    } else {
        args.tasks.clone()
    };

    let queue = RedisQueue::new(&args.redis_url)?;

    for i in 0..args.count {
        let name = &names[i % names.len()];
        let task_id = format!("{name}-instance-{i}");
        let partition = partition_for_task(name, PARTITION_COUNT);
        queue.push(&partition_queue(partition), &task_id).await?;
    }

    info!(count = args.count, "tasks enqueued");
    Ok(())
}
