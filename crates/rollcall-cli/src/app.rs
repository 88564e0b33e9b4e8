//! Command implementations shared by the subcommands and the menu.

use crate::config::Config;
use crate::menu::MenuActions;
use crate::session::{Session, StopSignal};
use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use rollcall_core::{EmbeddingOracle, EuclideanMatcher, Identity, OnnxOracle};
use rollcall_hw::Camera;
use rollcall_store::{Ledger, RegistryStore};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

/// Buffers tried per registration capture before giving up on a dark scene.
const REGISTER_DARK_RETRIES: usize = 15;

pub struct App {
    config: Config,
    stop: Arc<StopSignal>,
    oracle: Option<OnnxOracle>,
}

#[derive(Serialize)]
struct UserRow {
    name: Identity,
    images: usize,
}

impl App {
    pub fn new(config: Config, stop: Arc<StopSignal>) -> Self {
        Self {
            config,
            stop,
            oracle: None,
        }
    }

    fn store(&self) -> RegistryStore {
        RegistryStore::new(&self.config.images_dir)
    }

    /// Store reference images for `name`: the given files, or camera captures.
    ///
    /// Only images in which a face is detected are kept.
    pub fn register(&mut self, name: &str, images: &[PathBuf]) -> Result<()> {
        let identity = Identity::new(name).with_context(|| format!("invalid name {name:?}"))?;
        let store = self.store();
        if store.contains(&identity) {
            println!("{identity} is already registered; adding more images.");
        }
        let oracle = ensure_oracle(&mut self.oracle, &self.config)?;

        let stored = if images.is_empty() {
            register_from_camera(&self.config, &store, oracle, &identity)?
        } else {
            register_from_files(&store, oracle, &identity, images)?
        };

        if stored == 0 {
            println!("No face detected; nothing stored for {identity}.");
        } else {
            println!(
                "Registered {stored} image(s) for {identity} ({} total).",
                store.image_count(&identity)?
            );
        }
        Ok(())
    }

    /// Run one attendance session until Ctrl-C or `max_frames`.
    pub fn recognize(&mut self, max_frames: Option<usize>, json: bool) -> Result<()> {
        let store = self.store();
        let oracle = ensure_oracle(&mut self.oracle, &self.config)?;

        let registry = store.load_all(oracle).context("loading registry")?;
        if registry.is_empty() {
            println!(
                "No registered faces in {}. Register someone first.",
                store.root().display()
            );
            return Ok(());
        }

        let ledger = Ledger::open(&self.config.ledger_path).context("opening attendance ledger")?;
        let camera = Camera::open(&self.config.camera_device).context("opening camera")?;
        let mut stream = camera.stream()?;
        stream.discard(self.config.warmup_frames);

        eprintln!(
            "Recognizing against {} reference image(s). Press Ctrl-C to stop.",
            registry.len()
        );
        let _armed = self.stop.arm();
        let mut session = Session::new(
            oracle,
            EuclideanMatcher,
            &registry,
            &ledger,
            self.config.distance_threshold,
        );
        let summary = session.run(&mut stream, &self.stop, max_frames, || {
            chrono::Local::now().naive_local()
        })?;

        if json {
            println!("{}", serde_json::to_string_pretty(&summary)?);
            return Ok(());
        }
        println!(
            "Session over after {} frame(s); {} person(s) recognized.",
            summary.frames,
            session.recognized().len()
        );
        for identity in &summary.recorded {
            println!("  recorded        {identity}");
        }
        for identity in &summary.already_marked {
            println!("  already marked  {identity}");
        }
        if session.recognized().is_empty() {
            println!("  nobody recognized");
        }
        Ok(())
    }

    pub fn delete(&mut self, name: &str) -> Result<()> {
        let identity = Identity::new(name).with_context(|| format!("invalid name {name:?}"))?;
        if self.store().remove(&identity)? {
            println!("Deleted {identity}. Past attendance rows are kept.");
        } else {
            println!("No registered user named {identity}.");
        }
        Ok(())
    }

    pub fn list(&self, json: bool) -> Result<()> {
        let store = self.store();
        let rows = store
            .identities()?
            .into_iter()
            .map(|name| -> Result<UserRow> {
                let images = store.image_count(&name)?;
                Ok(UserRow { name, images })
            })
            .collect::<Result<Vec<_>>>()?;

        if json {
            println!("{}", serde_json::to_string_pretty(&rows)?);
        } else if rows.is_empty() {
            println!("No registered users.");
        } else {
            for row in rows {
                println!("{:<24} {} image(s)", row.name, row.images);
            }
        }
        Ok(())
    }

    pub fn attendance(&self, date: Option<NaiveDate>, json: bool) -> Result<()> {
        let ledger = Ledger::open(&self.config.ledger_path).context("opening attendance ledger")?;
        let records = match date {
            Some(day) => ledger.records_on(day)?,
            None => ledger.records()?,
        };

        if json {
            println!("{}", serde_json::to_string_pretty(&records)?);
        } else if records.is_empty() {
            println!("No attendance recorded.");
        } else {
            for r in records {
                println!("{:<24} {} {}", r.name, r.date, r.time);
            }
        }
        Ok(())
    }

    pub fn devices(&self) {
        let devices = Camera::list_devices();
        if devices.is_empty() {
            println!("No V4L2 capture devices found.");
        }
        for d in devices {
            println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
        }
    }
}

impl MenuActions for App {
    fn register(&mut self, name: &str) -> Result<()> {
        App::register(self, name, &[])
    }

    fn recognize(&mut self) -> Result<()> {
        App::recognize(self, None, false)
    }

    fn delete(&mut self, name: &str) -> Result<()> {
        App::delete(self, name)
    }

    fn list(&mut self) -> Result<()> {
        App::list(self, false)
    }
}

/// Load the ONNX models on first use.
fn ensure_oracle<'a>(slot: &'a mut Option<OnnxOracle>, config: &Config) -> Result<&'a mut OnnxOracle> {
    let oracle = match slot.take() {
        Some(oracle) => oracle,
        None => OnnxOracle::load(&config.detector_model_path(), &config.recognizer_model_path())
            .with_context(|| format!("loading face models from {}", config.model_dir.display()))?,
    };
    Ok(slot.insert(oracle))
}

fn register_from_files(
    store: &RegistryStore,
    oracle: &mut dyn EmbeddingOracle,
    identity: &Identity,
    images: &[PathBuf],
) -> Result<usize> {
    let mut stored = 0;
    for path in images {
        let image = match image::open(path) {
            Ok(img) => img.to_luma8(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "unreadable image; not registered");
                println!("  {}: unreadable ({e}), skipped", path.display());
                continue;
            }
        };
        match oracle.detect_faces(&image) {
            Ok(faces) if faces.is_empty() => {
                tracing::warn!(path = %path.display(), "no face in image; not registered");
                println!("  {}: no face detected, skipped", path.display());
            }
            Ok(_) => {
                store.import_file(identity, path)?;
                stored += 1;
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "embedding failed; not registered");
                println!("  {}: face analysis failed ({e}), skipped", path.display());
            }
        }
    }
    Ok(stored)
}

fn register_from_camera(
    config: &Config,
    store: &RegistryStore,
    oracle: &mut dyn EmbeddingOracle,
    identity: &Identity,
) -> Result<usize> {
    if config.frames_per_register == 0 {
        bail!("frames_per_register is 0; pass --image or raise it");
    }
    let camera = Camera::open(&config.camera_device).context("opening camera")?;
    let mut stream = camera.stream()?;
    stream.discard(config.warmup_frames);
    println!("Look at the camera...");

    let mut stored = 0;
    for _ in 0..config.frames_per_register {
        let Some(frame) = stream.next_lit_frame(REGISTER_DARK_RETRIES)? else {
            tracing::warn!("only dark frames captured");
            continue;
        };
        let image = frame.into_image()?;
        match oracle.detect_faces(&image) {
            Ok(faces) if faces.is_empty() => tracing::debug!("no face in captured frame"),
            Ok(_) => {
                store.add_image(identity, &image)?;
                stored += 1;
            }
            Err(e) => tracing::warn!(error = %e, "embedding failed on captured frame; skipped"),
        }
    }
    Ok(stored)
}
