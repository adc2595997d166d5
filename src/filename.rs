//! 上传文件名校验与清洗。

use unicode_normalization::UnicodeNormalization;

use crate::config::{ALLOWED_EXTENSIONS, ExtensionRule};

const MAX_NAME_LEN: usize = 255;
const MAX_KEPT_EXTENSION_LEN: usize = 16;

const WINDOWS_DEVICE_NAMES: [&str; 22] = [
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// 按规则取出待校验的扩展名片段；没有 `.` 时返回 None。
pub fn checked_extension(name: &str, rule: ExtensionRule) -> Option<&str> {
    match rule {
        ExtensionRule::FirstDot => name.split_once('.').map(|(_, rest)| {
            rest.split_once('.').map_or(rest, |(segment, _)| segment)
        }),
        ExtensionRule::LastDot => name.rsplit_once('.').map(|(_, ext)| ext),
    }
}

/// 判断文件名的扩展名是否在允许列表中（区分大小写）。
pub fn is_allowed(name: &str, rule: ExtensionRule) -> bool {
    checked_extension(name, rule).is_some_and(|ext| ALLOWED_EXTENSIONS.contains(&ext))
}

/// 将客户端提交的文件名转换为可安全落盘的名称。
///
/// 先做 NFKD 分解再丢弃非 ASCII 字符（`naïve` 变为 `naive`）。结果只包含
/// `[A-Za-z0-9_.-]`，不以 `.` 或 `_` 开头结尾，因此不会包含目录分隔符或 `..` 前缀。
/// 主干全部被丢弃时只剩扩展名本身（`《》.txt` 变为 `txt`）。
/// 相同输入总是得到相同输出，且对输出再次清洗结果不变。
pub fn sanitize(raw: &str) -> String {
    let ascii: String = raw
        .nfkd()
        .filter(|ch| ch.is_ascii() && (ch.is_ascii_whitespace() || !ch.is_ascii_control()))
        .map(|ch| if ch == '/' || ch == '\\' { ' ' } else { ch })
        .collect();
    let joined = ascii.split_whitespace().collect::<Vec<_>>().join("_");
    let filtered: String = joined
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '.' | '-'))
        .collect();
    let name = truncate_keeping_extension(trim_edges(&filtered), MAX_NAME_LEN);

    if is_windows_device_name(&name) {
        return format!("_{}", truncate_keeping_extension(&name, MAX_NAME_LEN - 1));
    }

    name
}

/// 超长时截短主干并保留最后一个扩展名；扩展名本身过长时直接截断。
fn truncate_keeping_extension(name: &str, limit: usize) -> String {
    if name.len() <= limit {
        return name.to_string();
    }
    match name.rfind('.') {
        Some(dot) if dot > 0 && name.len() - dot <= MAX_KEPT_EXTENSION_LEN => {
            let (stem, ext) = name.split_at(dot);
            let stem = stem[..limit - ext.len()].trim_end_matches(['.', '_']);
            format!("{stem}{ext}")
        }
        _ => name[..limit].trim_end_matches(['.', '_']).to_string(),
    }
}

/// 名称是否恰好是 [`sanitize`] 的输出。
pub fn is_sanitized(name: &str) -> bool {
    !name.is_empty() && sanitize(name) == name
}

fn trim_edges(name: &str) -> &str {
    name.trim_matches(['.', '_'])
}

fn is_windows_device_name(name: &str) -> bool {
    let stem = name.split('.').next().unwrap_or_default();
    WINDOWS_DEVICE_NAMES
        .iter()
        .any(|device| device.eq_ignore_ascii_case(stem))
}
