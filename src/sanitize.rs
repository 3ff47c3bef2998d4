//! 客户端文件名清洗。

use crate::error::UploadError;

fn is_allowed(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
}

/// 将任意客户端文件名映射为仅含 `[A-Za-z0-9._-]` 的名字。
///
/// 每个不允许的字符（按 Unicode 标量计）替换为一个 `_`，
/// 因此输出字符数与输入相同，且重复清洗结果不变。
pub fn sanitize_file_name(raw: &str) -> String {
    raw.chars()
        .map(|c| if is_allowed(c) { c } else { '_' })
        .collect()
}

/// 拒绝清洗后仍无法作为普通文件名使用的名字。
pub fn validate_file_name(name: &str) -> Result<(), UploadError> {
    match name {
        "" | "." | ".." => Err(UploadError::InvalidName(name.to_string())),
        _ => Ok(()),
    }
}

/// 清洗并校验，供两个上传入口共用。
pub fn safe_file_name(raw: &str) -> Result<String, UploadError> {
    let name = sanitize_file_name(raw);
    validate_file_name(&name)?;
    Ok(name)
}
