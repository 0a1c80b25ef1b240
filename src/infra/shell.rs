//! 远程 shell 命令拼装
//!
//! 所有拼进远程命令的用户可控值都必须经过这里：
//! 名称与路径先做白名单校验，再统一用 POSIX 单引号转义。

use crate::error::{DeployError, DeployResult};

/// 项目名最小长度
pub const NAME_MIN_LEN: usize = 3;
/// 项目名最大长度
pub const NAME_MAX_LEN: usize = 100;

fn is_safe_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
}

/// 单引号转义
///
/// 只由安全字符组成的值原样返回，便于日志阅读。
pub fn quote(value: &str) -> String {
    let plain = !value.is_empty()
        && value
            .chars()
            .all(|c| is_safe_char(c) || matches!(c, '/' | ':' | '=' | '@' | '%' | '+' | ','));
    if plain {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// 校验项目名（远程目录名与备份文件名前缀）
pub fn validate_name(name: &str) -> DeployResult<()> {
    let len = name.chars().count();
    if !(NAME_MIN_LEN..=NAME_MAX_LEN).contains(&len) {
        return Err(DeployError::validation(format!(
            "project name must be {}-{} characters, got {}",
            NAME_MIN_LEN, NAME_MAX_LEN, len
        )));
    }
    if name.starts_with('-') || name.starts_with('.') {
        return Err(DeployError::validation(format!(
            "project name {:?} must not start with '-' or '.'",
            name
        )));
    }
    if !name.chars().all(is_safe_char) {
        return Err(DeployError::validation(format!(
            "project name {:?} may only contain letters, digits, '.', '_' and '-'",
            name
        )));
    }
    Ok(())
}

/// 校验远程绝对目录
pub fn validate_remote_dir(path: &str) -> DeployResult<()> {
    if !path.starts_with('/') {
        return Err(DeployError::validation(format!(
            "deploy path {:?} must be absolute",
            path
        )));
    }
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        if segment == ".." || segment == "." {
            return Err(DeployError::validation(format!(
                "deploy path {:?} must not contain relative segments",
                path
            )));
        }
        if !segment.chars().all(is_safe_char) {
            return Err(DeployError::validation(format!(
                "deploy path {:?} contains unsupported characters",
                path
            )));
        }
    }
    Ok(())
}

/// 校验上传文件名（落到远程暂存目录与目标目录）
pub fn validate_file_name(name: &str) -> DeployResult<()> {
    if name.is_empty() || name.starts_with('-') || name.starts_with('.') {
        return Err(DeployError::validation(format!(
            "upload file name {:?} is not allowed",
            name
        )));
    }
    if !name.chars().all(is_safe_char) {
        return Err(DeployError::validation(format!(
            "upload file name {:?} may only contain letters, digits, '.', '_' and '-'",
            name
        )));
    }
    Ok(())
}

/// 拼接远程路径
pub fn join(dir: &str, leaf: &str) -> String {
    let dir = dir.trim_end_matches('/');
    if dir.is_empty() {
        format!("/{}", leaf)
    } else {
        format!("{}/{}", dir, leaf)
    }
}
