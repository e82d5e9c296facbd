//! Renders the parsed, validated server fleet as a human-readable dashboard
//! on startup — not a logging path (see C10 for that), just operator-facing
//! terminal output for "here's what loomio is about to listen on."

use std::fmt;

use crate::config::types::{RouteConfig, ServerConfig};

mod style {
    pub const DIM: &str = "\x1b[38;5;244m";
    pub const RESET: &str = "\x1b[0m";
    pub const HEADING: &str = "\x1b[1;35m";
    pub const BLOCK: &str = "\x1b[1;37m";
    pub const OK: &str = "32";
    pub const FAIL: &str = "31";
}

impl fmt::Display for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  {}───────────────────────────────────────────────{}", style::DIM, style::RESET)?;
        writeln!(
            f,
            "  \x1b[1;34m⦿\x1b[0m \x1b[1;37mNetwork:\x1b[0m     \x1b[32m{}\x1b[0m {}via ports{} \x1b[1;32m{:?}\x1b[0m",
            self.host, style::DIM, style::RESET, self.ports
        )?;
        writeln!(f, "  \x1b[1;34m⦿\x1b[0m \x1b[1;37mIdentity:\x1b[0m    \x1b[36m{}\x1b[0m", self.server_name)?;
        writeln!(
            f,
            "  \x1b[1;34m⦿\x1b[0m \x1b[1;37mDefault:\x1b[0m     \x1b[{}m{}\x1b[0m",
            if self.default_server { style::OK } else { style::FAIL },
            if self.default_server { "YES" } else { "NO" }
        )?;
        writeln!(
            f,
            "  \x1b[1;34m⦿\x1b[0m \x1b[1;37mBody Limit:\x1b[0m  \x1b[33m{} KB\x1b[0m",
            self.client_max_body_size / 1024
        )?;

        if !self.error_pages.is_empty() {
            writeln!(f, "  \x1b[1;34m⦿\x1b[0m \x1b[1;37mError Pages:\x1b[0m")?;
            let mut pages: Vec<_> = self.error_pages.iter().collect();
            pages.sort_by_key(|(code, _)| **code);
            for (code, path) in pages {
                writeln!(f, "    {}{:4}{} → \x1b[31m{}\x1b[0m", style::DIM, code, style::RESET, path)?;
            }
        }

        writeln!(f, "\n  {}📋 ROUTING TABLE ({}) {}", style::BLOCK, self.routes.len(), style::RESET)?;
        writeln!(f, "  {}───────────────────────────────────────────────{}", style::DIM, style::RESET)?;

        let mut sorted_routes = self.routes.clone();
        sorted_routes.sort_by(|a, b| a.path.cmp(&b.path));

        for (idx, route) in sorted_routes.iter().enumerate() {
            let is_last = idx == sorted_routes.len() - 1;
            let branch = if is_last { "  └──" } else { "  ├──" };
            writeln!(f, "  {}{}{} {}{}{}", style::DIM, branch, style::RESET, style::BLOCK, route.path, style::RESET)?;
            route.fmt_details(f, is_last)?;
            if !is_last {
                writeln!(f, "  {}    │{}", style::DIM, style::RESET)?;
            }
        }
        Ok(())
    }
}

impl RouteConfig {
    pub(crate) fn fmt_details(&self, f: &mut fmt::Formatter<'_>, is_last_route: bool) -> fmt::Result {
        let indent = if is_last_route { "     " } else { "  │  " };
        let methods_fmt = self.methods.join(" | ");

        writeln!(
            f,
            "  \x1b[38;5;250m{}├─ Methods:\x1b[0m \x1b[48;5;236m\x1b[38;5;250m {}\x1b[0m",
            if is_last_route { "   " } else { "    " },
            methods_fmt
        )?;
        writeln!(f, "  \x1b[38;5;250m{}├─ Root:\x1b[0m    \x1b[32m{}\x1b[0m", indent, self.root)?;
        writeln!(f, "  \x1b[38;5;250m{}├─ Default:\x1b[0m  \x1b[36m{}\x1b[0m", indent, self.default_file)?;
        writeln!(
            f,
            "  \x1b[38;5;250m{}├─ Autoindex:\x1b[0m \x1b[{}m{}\x1b[0m",
            indent,
            if self.autoindex { style::OK } else { style::FAIL },
            if self.autoindex { "ON" } else { "OFF" }
        )?;

        if let Some(redir) = &self.redirection {
            writeln!(f, "  \x1b[38;5;250m{}├─ Redirect:\x1b[0m \x1b[35m{}\x1b[0m", indent, redir)?;
        }
        match &self.cgi_ext {
            Some(cgi) => writeln!(f, "  \x1b[38;5;250m{}└─ CGI:\x1b[0m     \x1b[38;5;208m{}\x1b[0m", indent, cgi)?,
            None => writeln!(f, "  \x1b[38;5;250m{}└─ CGI:\x1b[0m      \x1b[31mDISABLED\x1b[0m", indent)?,
        }
        Ok(())
    }
}

/// Prints the whole fleet dashboard to stdout. Called once at startup after
/// [`crate::config::validate::validate_configs`] has dropped anything broken.
pub fn display_config(configs: &[ServerConfig]) {
    println!("\n{} 🌐 LOOMIO SERVER DASHBOARD{}", style::HEADING, style::RESET);
    println!("\x1b[38;5;240m ════════════════════════════════════════════════════════════════\x1b[0m");
    for (i, server) in configs.iter().enumerate() {
        println!("\n  {}SERVER BLOCK {:02}{}", style::BLOCK, i + 1, style::RESET);
        print!("{}", server);
    }
    println!("\n\x1b[38;5;240m ════════════════════════════════════════════════════════════════\x1b[0m");
    println!(" \x1b[1;32m✔\x1b[0m {} servers ready to accept connections\n", configs.len());
}
