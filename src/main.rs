// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

mod args;

use args::Args;
use chrono::Local;
use clap::Parser;
use fieldcam::Camera;
use std::{
    error::Error,
    fs::{self, File},
    io::{self, Write},
    path::{Path, PathBuf},
};
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, Layer, Registry};

fn init_logging(args: &Args) -> Result<(), Box<dyn Error>> {
    let stdout_log = tracing_subscriber::fmt::layer()
        .pretty()
        .with_filter(match args.verbose {
            true => LevelFilter::TRACE,
            false => LevelFilter::INFO,
        });

    let journald = match tracing_journald::layer() {
        Ok(journald) => Some(journald.with_filter(LevelFilter::INFO)),
        Err(_) => None,
    };

    let tracy = match args.tracy {
        true => Some(tracing_tracy::TracyLayer::default().with_filter(LevelFilter::TRACE)),
        false => None,
    };

    let subscriber = Registry::default()
        .with(stdout_log)
        .with(journald)
        .with(tracy);
    tracing::subscriber::set_global_default(subscriber)?;
    tracing_log::LogTracer::init()?;
    Ok(())
}

/// Writes `jpeg` to `<dir>/<YYYYmmdd-HHMMSS>.jpg`.
fn save(dir: &Path, jpeg: &[u8]) -> io::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}.jpg", Local::now().format("%Y%m%d-%H%M%S")));
    let mut file = File::create(&path)?;
    file.write_all(jpeg)?;
    file.flush()?;
    Ok(path)
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    let _tracy = args.tracy.then(tracy_client::Client::start);
    init_logging(&args)?;

    let settings = args.settings()?;
    let mut camera = Camera::new(settings)?;
    let snapshot = camera.capture()?;
    let (width, height, size) = (snapshot.width, snapshot.height, snapshot.jpeg.len());
    let path = save(&args.output, snapshot.jpeg)?;
    info!("saved {}x{} {} bytes to {}", width, height, size, path.display());

    Ok(())
}
