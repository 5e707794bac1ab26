use std::{env, env::VarError, fmt::Write};

use crate::{config::GatewayConfig, route_table::RouteTable};

const DISPLAY_ENVS: [&str; 14] = [
    "RUST_LOG",
    "EGW_HOST",
    "EGW_PORT",
    "EGW_ROUTES_FILE",
    "EGW_ROUTES",
    "EGW_IDENTITY_URL",
    "EGW_IDENTITY_TIMEOUT_MS",
    "EGW_AUTH_PREFIX",
    "EGW_API_PREFIX",
    "EGW_HEALTH_PATH",
    "EGW_MAX_BODY_SIZE",
    "EGW_USE_X_FORWARDED_FOR",
    "EGW_USE_FORWARDED",
    "EGW_CORS_PERMISSIVE",
];

/// The gateway is configured through the environment. Any argument prints help and the effective configuration
/// instead of starting the server; `--routes` prints just the route table, in route file form.
///
/// Returns true if the server should not be started.
pub fn handle_command_line_args() -> bool {
    let args = env::args().skip(1).collect::<Vec<_>>();
    if args.is_empty() {
        return false;
    }
    let config = GatewayConfig::from_env_or_default();
    if args.iter().any(|a| a == "--routes") {
        match config.map(|c| serde_json::to_string_pretty(&c.routes.to_route_file())) {
            Ok(Ok(json)) => println!("{json}"),
            Ok(Err(e)) => eprintln!("Could not serialize the route table. {e}"),
            Err(e) => eprintln!("{e}"),
        }
        return true;
    }
    display_readme();
    display_envs();
    match config {
        Ok(config) => {
            println!("Effective configuration:");
            println!("  Listening on       {}:{}", config.host, config.port);
            println!("  Identity authority {} ({} ms)", config.identity.whoami_url, config.identity.timeout.as_millis());
            println!("  Open namespace     {}", config.auth_prefix);
            println!("  Protected writes   {}", config.api_prefix);
            println!("  Health check       {}", config.health_path);
            println!("\nRoutes, in match order:\n{}", route_summary(&config.routes));
        },
        Err(e) => println!("The current configuration is invalid. {e}"),
    }
    true
}

fn display_readme() {
    const README: &str = include_str!("./cli-help.txt");
    println!("\n{README}\n");
}

fn display_envs() {
    println!("Current environment values:");
    DISPLAY_ENVS.iter().for_each(|&name| {
        let val = match env::var(name) {
            Ok(s) => s,
            Err(VarError::NotPresent) => "Not set".into(),
            Err(VarError::NotUnicode(s)) => format!("Invalid value: {}", s.to_string_lossy()),
        };
        println!("  {name:<35} {val:<15}");
    });
    println!();
}

/// One line per route: prefix, origin and rewrite rule.
pub fn route_summary(routes: &RouteTable) -> String {
    routes.routes().iter().fold(String::new(), |mut out, r| {
        let _ = writeln!(out, "  {:<25} {:<35} {}", r.prefix(), r.origin().as_str(), r.rewrite());
        out
    })
}
