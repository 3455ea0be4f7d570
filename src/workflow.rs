/// Decryption workflow around liberation
///
/// The cipher lives outside this crate. A host plugs it in through
/// [`DecryptionEngine`]; this module only guarantees that the input file has
/// been liberated before the engine opens it.
use crate::config::types::{LiberationError, Result};
use crate::kernel::restart_manager::ShutdownOutcome;
use crate::kernel::Platform;
use crate::liberation::Liberator;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag shared between a caller and an engine
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Page-oriented database cipher supplied by the host
pub trait DecryptionEngine: Send + Sync {
    /// Size of one database page in bytes
    fn page_size(&self) -> usize;

    /// Whether `key` decrypts `first_page`
    fn validate(&self, first_page: &[u8], key: &[u8]) -> bool;

    /// Decrypt `input` into `sink`. Engines should poll `cancel` between pages.
    fn decrypt(
        &self,
        cancel: &CancellationToken,
        input: &Path,
        hex_key: &str,
        sink: &mut dyn Write,
    ) -> Result<()>;
}

/// Check `hex_key` against the first page of `path`.
///
/// The page is filled by a single read; a file shorter than one page is
/// validated on what was read, zero-padded to the page size. Unreadable or
/// empty files and malformed keys are `false`.
pub fn validate_key(engine: &dyn DecryptionEngine, path: &Path, hex_key: &str) -> bool {
    let key = match hex::decode(hex_key) {
        Ok(key) => key,
        Err(e) => {
            log::debug!("Rejecting key for {}: {}", path.display(), e);
            return false;
        }
    };

    let mut first_page = vec![0u8; engine.page_size()];
    match File::open(path).and_then(|mut file| file.read(&mut first_page)) {
        Ok(0) => {
            log::debug!("{} is empty", path.display());
            return false;
        }
        Ok(_) => {}
        Err(e) => {
            log::debug!("Cannot read first page of {}: {}", path.display(), e);
            return false;
        }
    }

    engine.validate(&first_page, &key)
}

/// Liberate `input`, then decrypt it into a freshly created `output`.
///
/// Liberation is best effort: without a liberator, or when it fails, the
/// engine still runs and reports the real error if the file is still locked.
pub fn decrypt_database<P: Platform>(
    liberator: Option<&Liberator<P>>,
    engine: &dyn DecryptionEngine,
    input: &Path,
    output: &Path,
    hex_key: &str,
    cancel: &CancellationToken,
) -> Result<()> {
    match liberator.map(|l| l.liberate(input)) {
        None => log::warn!("No liberator available, decrypting {} as is", input.display()),
        Some(Ok(report)) if report.shutdown == ShutdownOutcome::NothingHeld && report.self_handles_closed == 0 => {
            log::debug!("{} was not held by anyone", input.display());
        }
        Some(Ok(report)) => log::info!(
            "Liberated {} ({} own handles closed)",
            input.display(),
            report.self_handles_closed
        ),
        Some(Err(e)) => log::warn!("Liberation of {} failed, decrypting anyway: {}", input.display(), e),
    }

    if cancel.is_cancelled() {
        return Err(LiberationError::Engine("decryption cancelled".to_string()));
    }

    let file = File::create(output).map_err(|e| {
        LiberationError::Engine(format!("failed to create output file {}: {}", output.display(), e))
    })?;
    let mut sink = BufWriter::new(file);

    engine.decrypt(cancel, input, hex_key, &mut sink)?;
    sink.flush()?;
    Ok(())
}
