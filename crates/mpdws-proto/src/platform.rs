use std::path::PathBuf;

pub const DEFAULT_SERVER_URL: &str = "ws://127.0.0.1:3000/ws";

pub fn data_dir() -> PathBuf {
    // On macOS and Linux, use ~/.local/share/mpdws/ (XDG standard)
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".local")
            .join("share")
            .join("mpdws")
    }
    #[cfg(windows)]
    {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("mpdws")
    }
}

pub fn config_dir() -> PathBuf {
    // On macOS and Linux, always use ~/.config/mpdws/
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("mpdws")
    }

    #[cfg(windows)]
    {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("mpdws")
    }
}

pub fn log_path() -> PathBuf {
    data_dir().join("mpdws.log")
}
