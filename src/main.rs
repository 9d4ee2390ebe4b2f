use std::env;
use std::error::Error;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use carfinder::{
    CarfinderConfig, HttpRecognizer, ImageFormat, ImageUpload, SourceOverrides, VehicleSearch,
};

const USAGE: &str = "usage: carfinder <config.yaml> <image> [enable=a,b] [disable=c]";

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("carfinder: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), Box<dyn Error>> {
    let args: Vec<String> = env::args().skip(1).collect();
    let [config_path, image_path, rest @ ..] = args.as_slice() else {
        return Err(USAGE.into());
    };

    let mut enable = None;
    let mut disable = None;
    for arg in rest {
        match arg.split_once('=') {
            Some(("enable", list)) => enable = Some(list),
            Some(("disable", list)) => disable = Some(list),
            _ => return Err(format!("unexpected argument '{arg}'\n{USAGE}").into()),
        }
    }
    let overrides = SourceOverrides::parse(enable, disable)?;

    let mut config = CarfinderConfig::from_file(config_path)?;
    config.apply_env_overrides()?;
    let recognizer = Arc::new(HttpRecognizer::new(&config.recognizer)?);
    let search = VehicleSearch::from_config(&config, recognizer)?;

    let mut upload = ImageUpload::new(std::fs::read(image_path)?);
    if let Some(format) = Path::new(image_path)
        .extension()
        .and_then(|ext| ext.to_str())
        .and_then(ImageFormat::from_extension)
    {
        upload = upload.with_declared_format(format);
    }

    let response = search.search(upload, &overrides).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}
