//! Input list files handed to aria2c and the ffmpeg concat demuxer

use std::path::{Path, PathBuf};

/// Referer the video CDN insists on
pub const DOWNLOAD_REFERER: &str = "https://courses.sjtu.edu.cn/";

/// aria2c `-i` list: each url followed by its indented options
pub fn download_job_list(jobs: &[(String, PathBuf)]) -> String {
    let mut list = String::new();
    for (url, target) in jobs {
        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        list.push_str(&format!(
            "{}\n out={}\n header=referer: {}\n",
            url, name, DOWNLOAD_REFERER
        ));
    }
    list
}

/// ffmpeg concat list, one `file '<path>'` line per input
pub fn concat_list(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|path| format!("file '{}'\n", escape_single_quotes(path)))
        .collect()
}

fn escape_single_quotes(path: &Path) -> String {
    path.display().to_string().replace('\'', r"'\''")
}
