//! 命令校验：危险模式优先，其次白名单
//!
//! 只要命中任一危险模式（破坏性操作、外网下载、提权、链式 / 管道元字符）就拒绝，与白名单无关；
//! 未命中时，命令必须等于白名单条目，或以「条目 + 空格」开头。

use regex::Regex;

use super::{SandboxViolation, SecurityPolicy};

/// (正则, 说明)；说明会出现在拒绝原因里
const DANGEROUS_PATTERNS: &[(&str, &str)] = &[
    (r"&&", "command chaining '&&'"),
    (r"\|\|", "command chaining '||'"),
    (r";", "command separator ';'"),
    (r"\|", "pipe '|'"),
    (r"`", "backtick substitution"),
    (r"\$\(", "command substitution '$('"),
    (r"[<>]", "redirection"),
    (r"(?i)\brm\s+(-[a-z]*\s+)*-[a-z]*[rf]", "recursive/forced delete"),
    (r"(?i)\b(rmdir|del|rd)\s+/s\b", "recursive delete"),
    (r"(?i)\bmkfs(\.\w+)?\b", "filesystem format"),
    (r"(?i)\bformat\s+[a-z]:", "disk format"),
    (r"(?i)\bdd\s+if=", "raw disk write"),
    (r"(?i)\bshred\b", "secure delete"),
    (r"(?i)\b(curl|wget|nc|ncat|netcat|telnet|ftp|scp|ssh)\b", "network access"),
    (r"(?i)invoke-webrequest|\biwr\b", "network access"),
    (r"(?i)\b(sudo|su|doas|runas)\b", "privilege escalation"),
    (r"(?i)\bchmod\b", "permission change"),
    (r"(?i)\bchown\b", "ownership change"),
    (r"(?i)\b(shutdown|reboot|halt|poweroff)\b", "system power control"),
    (r"(?i)\bgit\s+(push\s+.*--force|reset\s+--hard|clean\s+-[a-z]*f)", "destructive git operation"),
];

pub(crate) fn dangerous_patterns() -> Vec<(Regex, &'static str)> {
    DANGEROUS_PATTERNS
        .iter()
        .filter_map(|(pattern, label)| Regex::new(pattern).ok().map(|re| (re, *label)))
        .collect()
}

impl SecurityPolicy {
    pub fn validate_command(&self, cmdline: &str) -> Result<(), SandboxViolation> {
        let cmd = cmdline.trim();
        if cmd.is_empty() {
            return Err(SandboxViolation::EmptyCommand);
        }
        if let Some((_, label)) = self.dangerous_patterns.iter().find(|(re, _)| re.is_match(cmd)) {
            return Err(SandboxViolation::DangerousCommand(label.to_string()));
        }
        let allowed = self.command_whitelist.iter().any(|entry| {
            cmd == entry
                || cmd
                    .strip_prefix(entry.as_str())
                    .is_some_and(|rest| rest.starts_with(' '))
        });
        if allowed {
            Ok(())
        } else {
            Err(SandboxViolation::CommandNotAllowed(cmd.to_string()))
        }
    }
}
