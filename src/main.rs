// Transcribe-Local demo runner
//
// Runs one transcription task against the Python worker and prints the
// event stream plus the final canonical result as JSON. Stands in for the
// HTTP transport layer.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use transcribe_local::engine::{SenkoConfig, SenkoEngine};
use transcribe_local::{TaskRequest, TranscriptionService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let mut args = env::args().skip(1);
    let Some(audio_path) = args.next() else {
        eprintln!("Usage: transcribe-local <audio-file> [worker-script]");
        std::process::exit(2);
    };
    let script_path = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("scripts/transcribe_senko.py"));

    let engine = Arc::new(SenkoEngine::new(SenkoConfig::new(script_path)));
    let service = Arc::new(TranscriptionService::new(engine));

    let request = TaskRequest::new(PathBuf::from(audio_path));
    let mut subscription = service.subscribe(&request.task_id);
    log::info!("Watching task {}", subscription.task_id());

    let runner = {
        let service = Arc::clone(&service);
        let request = request.clone();
        tokio::spawn(async move { service.start_task(request).await })
    };

    while let Some(event) = subscription.recv().await {
        let terminal = event.is_terminal();
        println!("{}", serde_json::to_string(&event)?);
        if terminal {
            break;
        }
    }

    let result = runner.await??;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
