use anyhow::Context;
use burn::tensor::backend::{AutodiffBackend, Backend};
use clap::Parser;
use sentiment_finetune::{
    cli::{ClassifyArgs, Cli, Command, TrainArgs},
    pipeline, HubSource, HuggingfaceSource, TextClassifier,
};
use tracing_subscriber::EnvFilter;

fn train<B: AutodiffBackend>(args: &TrainArgs, device: B::Device) -> anyhow::Result<()> {
    let config = args.training_config()?;
    let report = pipeline::run::<B>(&config, &HuggingfaceSource, &HubSource, &device)
        .with_context(|| format!("fine-tuning '{}' on '{}' failed", config.model_name, config.dataset_name))?;

    println!(
        "Best epoch {} (score {:.4}); final accuracy {:.4}; model saved to '{}'",
        report.best_epoch,
        report.best_score,
        report.final_metric,
        report.save_dir.display()
    );
    Ok(())
}

fn classify<B: Backend>(args: &ClassifyArgs, device: B::Device) -> anyhow::Result<()> {
    let classifier = TextClassifier::<B>::load(&args.model_dir, &device)
        .with_context(|| format!("cannot load classifier from '{}'", args.model_dir.display()))?;

    let texts: Vec<&str> = args.texts.iter().map(String::as_str).collect();
    for (text, prediction) in texts.iter().zip(classifier.classify_batch(&texts)?) {
        println!("{}\t{:.4}\t{}", prediction.label, prediction.score, text);
    }
    Ok(())
}

mod backend {
    use burn::backend::ndarray::{NdArray, NdArrayDevice};
    use burn::backend::Autodiff;

    pub type Inner = NdArray<f32>;
    pub type Training = Autodiff<Inner>;

    pub fn device() -> NdArrayDevice {
        NdArrayDevice::Cpu
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sentiment_finetune=info")),
        )
        .init();

    match Cli::parse().command {
        Command::Train(args) => train::<backend::Training>(&args, backend::device()),
        Command::Classify(args) => classify::<backend::Inner>(&args, backend::device()),
    }
}
