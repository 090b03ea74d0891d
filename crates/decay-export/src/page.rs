use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::engines::BrowserSession;
use crate::locator::Locator;
use crate::{ExportError, Selector};

/// Load state to wait for after a navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitUntil {
    /// The `load` event fired.
    Load,
    /// `load` fired and no request has been in flight for 500 ms.
    NetworkIdle,
}

/// A finished file transfer sitting in the browser's staging directory.
///
/// Only constructed once the browser has reported the transfer complete.
#[derive(Debug, Clone)]
pub struct Download {
    path: PathBuf,
    suggested_filename: String,
}

impl Download {
    pub fn new(path: impl Into<PathBuf>, suggested_filename: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            suggested_filename: suggested_filename.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn suggested_filename(&self) -> &str {
        &self.suggested_filename
    }

    /// Copy the transfer to `dest`, returning the number of bytes written.
    ///
    /// The data is written to `<dest>.part` first and renamed into place, so
    /// `dest` never names a partially written file.
    pub async fn save_as(&self, dest: &Path) -> Result<u64, ExportError> {
        let size = tokio::fs::metadata(&self.path).await?.len();
        if size == 0 {
            return Err(ExportError::Download(format!(
                "{} is empty",
                self.suggested_filename
            )));
        }

        let part = part_path(dest);
        if let Err(e) = copy_then_rename(&self.path, &part, dest).await {
            if let Err(cleanup) = tokio::fs::remove_file(&part).await {
                debug!("no partial file to clean up at {}: {}", part.display(), cleanup);
            }
            return Err(e);
        }
        Ok(size)
    }
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = OsString::from(dest.as_os_str());
    name.push(".part");
    PathBuf::from(name)
}

async fn copy_then_rename(src: &Path, part: &Path, dest: &Path) -> Result<(), ExportError> {
    tokio::fs::copy(src, part).await?;
    tokio::fs::rename(part, dest).await?;
    Ok(())
}

/// A single tab in an isolated browsing context.
#[derive(Clone)]
pub struct Page {
    session: Arc<dyn BrowserSession>,
    timeout: Duration,
}

impl Page {
    pub fn new(session: Box<dyn BrowserSession>, timeout: Duration) -> Self {
        Self {
            session: Arc::from(session),
            timeout,
        }
    }

    /// Wait applied to every operation on this page.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn locator(&self, selector: impl Into<Selector>) -> Locator {
        Locator::new(self.session.clone(), selector.into()).set_default_timeout(self.timeout)
    }

    #[instrument(level = "debug", skip(self))]
    pub async fn goto(&self, url: &str, wait: WaitUntil) -> Result<(), ExportError> {
        self.session.goto(url, wait, self.timeout).await
    }

    pub async fn wait_for_load(&self, wait: WaitUntil) -> Result<(), ExportError> {
        self.session.wait_for_load(wait, self.timeout).await
    }

    pub async fn url(&self) -> Result<String, ExportError> {
        self.session.current_url().await
    }

    /// Click `trigger` and hand back the completed download it produced.
    #[instrument(level = "debug", skip(self, trigger), fields(trigger = %trigger.selector()))]
    pub async fn expect_download(&self, trigger: &Locator) -> Result<Download, ExportError> {
        trigger.ensure_valid()?;
        let download = self
            .session
            .expect_download(trigger.selector(), trigger.timeout())
            .await?;
        debug!(
            file = %download.suggested_filename(),
            path = %download.path().display(),
            "Download completed"
        );
        Ok(download)
    }

    /// Close the browsing context. Failures are logged, not returned, so the
    /// caller's own result is what gets reported.
    pub async fn close(&self) {
        if let Err(e) = self.session.close().await {
            warn!("Failed to close browser session cleanly: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_as_moves_completed_file_into_place() {
        let staging = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let src = staging.path().join("3f2a-guid");
        tokio::fs::write(&src, b"item,card_type\nA,VISA\n").await.unwrap();

        let download = Download::new(&src, "report.csv");
        let dest = out.path().join("db_decay_7.csv");
        let written = download.save_as(&dest).await.unwrap();

        assert_eq!(written, 22);
        assert_eq!(
            tokio::fs::read_to_string(&dest).await.unwrap(),
            "item,card_type\nA,VISA\n"
        );
        assert!(!part_path(&dest).exists());
    }

    #[tokio::test]
    async fn empty_download_is_rejected() {
        let staging = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let src = staging.path().join("empty");
        tokio::fs::write(&src, b"").await.unwrap();

        let dest = out.path().join("db_decay_1.csv");
        let err = Download::new(&src, "report.csv")
            .save_as(&dest)
            .await
            .unwrap_err();

        assert!(matches!(err, ExportError::Download(_)));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn unwritable_destination_leaves_no_artifact() {
        let staging = tempfile::tempdir().unwrap();
        let src = staging.path().join("data");
        tokio::fs::write(&src, b"x").await.unwrap();

        let dest = staging.path().join("missing-dir").join("db_decay_2.csv");
        let err = Download::new(&src, "report.csv")
            .save_as(&dest)
            .await
            .unwrap_err();

        assert!(matches!(err, ExportError::Io(_)));
        assert!(!dest.exists());
    }

    #[test]
    fn part_path_appends_suffix() {
        assert_eq!(
            part_path(Path::new("/out/db_decay_3.csv")),
            PathBuf::from("/out/db_decay_3.csv.part")
        );
    }
}
