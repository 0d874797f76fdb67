//! Launch and tuning configuration for the CDP adapter.

use serde::{Deserialize, Serialize};
use std::{
    env,
    path::{Path, PathBuf},
};
use which::which;

/// Configuration for launching the browser and tuning the transport.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CdpConfig {
    /// Chrome/Chromium executable; auto-detected when empty.
    pub executable: PathBuf,
    pub user_data_dir: PathBuf,
    pub headless: bool,
    /// Default per-command deadline in milliseconds.
    pub default_deadline_ms: u64,
    /// Connect to an already-running browser instead of launching one.
    pub websocket_url: Option<String>,
    /// Extra command line switches appended to the launch args.
    pub extra_args: Vec<String>,
}

impl Default for CdpConfig {
    fn default() -> Self {
        Self {
            executable: detect_chrome_executable().unwrap_or_default(),
            user_data_dir: default_profile_dir(),
            headless: resolve_headless_default(),
            default_deadline_ms: 30_000,
            websocket_url: None,
            extra_args: Vec::new(),
        }
    }
}

impl CdpConfig {
    /// The executable to launch: the configured path when it points at a
    /// real file, otherwise whatever detection finds.
    pub fn resolve_executable(&self) -> Option<PathBuf> {
        if !self.executable.as_os_str().is_empty() && self.executable.exists() {
            return Some(self.executable.clone());
        }
        detect_chrome_executable()
    }
}

fn resolve_headless_default() -> bool {
    // WEBPILOT_HEADLESS: "0", "false", "no", "off" means headful
    match env::var("WEBPILOT_HEADLESS") {
        Ok(value) => {
            let lower = value.to_ascii_lowercase();
            !matches!(lower.as_str(), "0" | "false" | "no" | "off")
        }
        Err(_) => true,
    }
}

fn default_profile_dir() -> PathBuf {
    if let Ok(path) = env::var("WEBPILOT_CHROME_PROFILE") {
        return PathBuf::from(path);
    }
    Path::new("./.webpilot-profile").into()
}

/// One way a browser binary might be found.
#[derive(Clone, Debug, PartialEq, Eq)]
enum ChromeCandidate {
    /// Explicit path from `WEBPILOT_CHROME`.
    Explicit(PathBuf),
    /// Executable name to look up on `PATH`.
    OnPath(&'static str),
    /// Well-known install location for this OS.
    Installed(PathBuf),
}

/// Executable names tried on `PATH`, most common first.
fn path_names() -> &'static [&'static str] {
    if cfg!(target_os = "windows") {
        &["chrome.exe", "chromium.exe", "msedge.exe"]
    } else {
        &[
            "google-chrome-stable",
            "google-chrome",
            "chromium",
            "chromium-browser",
        ]
    }
}

/// Well-known install locations, assembled at runtime so the Windows
/// variants can follow the `PROGRAMFILES`/`LOCALAPPDATA` roots.
fn install_locations() -> Vec<PathBuf> {
    if cfg!(target_os = "windows") {
        let roots: Vec<PathBuf> = ["PROGRAMFILES", "PROGRAMFILES(X86)", "LOCALAPPDATA"]
            .iter()
            .filter_map(|key| env::var(key).ok())
            .map(|value| PathBuf::from(value.trim()))
            .filter(|root| !root.as_os_str().is_empty())
            .collect();
        let suffixes = [
            "Google/Chrome/Application/chrome.exe",
            "Chromium/Application/chrome.exe",
            "Microsoft/Edge/Application/msedge.exe",
        ];
        roots
            .iter()
            .flat_map(|root| suffixes.iter().map(move |suffix| root.join(suffix)))
            .collect()
    } else if cfg!(target_os = "macos") {
        vec![
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"),
            PathBuf::from("/Applications/Chromium.app/Contents/MacOS/Chromium"),
        ]
    } else {
        // Linux and friends keep the binaries under /usr/bin with the same
        // names PATH lookup uses.
        path_names()
            .iter()
            .map(|name| Path::new("/usr/bin").join(name))
            .collect()
    }
}

/// Ordered search plan: explicit override, then PATH, then OS install dirs.
/// `WEBPILOT_SKIP_OS_PATHS` cuts the plan after the PATH stage.
fn search_plan() -> Vec<ChromeCandidate> {
    let mut plan = Vec::new();

    if let Ok(raw) = env::var("WEBPILOT_CHROME") {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            plan.push(ChromeCandidate::Explicit(PathBuf::from(trimmed)));
        }
    }

    plan.extend(path_names().iter().copied().map(ChromeCandidate::OnPath));

    let skip_install_dirs = env::var("WEBPILOT_SKIP_OS_PATHS")
        .map(|value| !value.trim().is_empty())
        .unwrap_or(false);
    if !skip_install_dirs {
        plan.extend(install_locations().into_iter().map(ChromeCandidate::Installed));
    }

    plan
}

/// Locate a Chrome/Chromium executable by walking the search plan.
pub fn detect_chrome_executable() -> Option<PathBuf> {
    for candidate in search_plan() {
        match candidate {
            ChromeCandidate::Explicit(path) | ChromeCandidate::Installed(path) => {
                if path.exists() {
                    return Some(path);
                }
            }
            ChromeCandidate::OnPath(name) => {
                if let Ok(path) = which(name) {
                    return Some(path);
                }
            }
        }
    }
    None
}

/// Baseline launch switches shared by every profile.
pub(crate) fn default_launch_args(headless: bool) -> Vec<&'static str> {
    let mut args = vec![
        "--disable-background-networking",
        "--disable-background-timer-throttling",
        "--disable-breakpad",
        "--disable-client-side-phishing-detection",
        "--disable-component-update",
        "--disable-default-apps",
        "--disable-dev-shm-usage",
        "--disable-extensions",
        "--disable-hang-monitor",
        "--disable-popup-blocking",
        "--disable-prompt-on-repost",
        "--disable-sync",
        "--metrics-recording-only",
        "--no-first-run",
        "--no-default-browser-check",
        "--password-store=basic",
        "--remote-allow-origins=*",
        "--use-mock-keychain",
    ];
    if headless {
        args.push("--headless=new");
        args.push("--hide-scrollbars");
        args.push("--mute-audio");
    }
    args
}
