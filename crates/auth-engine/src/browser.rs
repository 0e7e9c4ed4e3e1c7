//! Opening the authorization URL for the user.

use std::io;
use tracing::debug;

/// Something that can show the user a URL.
pub trait BrowserLauncher: Send + Sync {
    fn open(&self, url: &str) -> io::Result<()>;
}

/// Hands the URL to the platform's default browser.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBrowser;

impl BrowserLauncher for SystemBrowser {
    fn open(&self, url: &str) -> io::Result<()> {
        debug!("opening system browser");
        open::that_detached(url)
    }
}

/// Prints the URL to stderr for the user to open by hand.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrintOnly;

impl BrowserLauncher for PrintOnly {
    fn open(&self, url: &str) -> io::Result<()> {
        eprintln!("Open this URL in your browser to authorize Encore:\n\n  {url}\n");
        Ok(())
    }
}
