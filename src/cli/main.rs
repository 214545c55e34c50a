use upseal::audit::{self, AuditConfig, LogDestination};
use upseal::dispatch;
use upseal::metadata::{MetadataBuilder, RoleType, SignedMetadata};
use upseal::{KeySet, SigningKey, TrustError};

use upseal::reexports::log;

use clap::{Arg, ArgAction, Command, crate_description, crate_name, crate_version};
use std::path::Path;

/// Artifact published by `init-repo --sample` so a fresh repository has
/// something to verify end to end.
const SAMPLE_TARGET_PATH: &str = "plugins/example/dist/index.js";
const SAMPLE_TARGET: &[u8] = b"export default function hello() {\n  return \"upseal sample\";\n}\n";

fn start() -> Result<(), TrustError> {
    let matches = Command::new(crate_name!())
        .version(crate_version!())
        .about(crate_description!())
        .arg(
            Arg::new("verbose")
                .short('v')
                .action(ArgAction::SetTrue)
                .help("Verbose output"),
        )
        .arg(
            Arg::new("debug")
                .short('d')
                .action(ArgAction::SetTrue)
                .help("Prints debugging information"),
        )
        .arg(
            Arg::new("audit")
                .long("audit")
                .action(ArgAction::SetTrue)
                .help("Enable structured audit logging (JSON to stderr)"),
        )
        .arg(
            Arg::new("audit-file")
                .long("audit-file")
                .value_name("FILE")
                .help("Write audit logs to FILE instead of stderr"),
        )
        .subcommand(
            Command::new("init-repo")
                .about("Create or update a signed repository directory")
                .arg(
                    Arg::new("repo_dir")
                        .value_name("repo_dir")
                        .long("repo-dir")
                        .short('r')
                        .required(true)
                        .help("Repository directory"),
                )
                .arg(
                    Arg::new("base_url")
                        .value_name("url")
                        .long("base-url")
                        .help("Advertised base URL, recorded in the repository info file"),
                )
                .arg(
                    Arg::new("version")
                        .value_name("version")
                        .long("version")
                        .short('V')
                        .default_value("1")
                        .help("Version stamped into all four role documents"),
                )
                .arg(
                    Arg::new("target")
                        .value_name("PATH=FILE")
                        .long("target")
                        .short('t')
                        .action(ArgAction::Append)
                        .help("Publish FILE under the repository-relative PATH"),
                )
                .arg(
                    Arg::new("sample")
                        .long("sample")
                        .action(ArgAction::SetTrue)
                        .help("Include a built-in sample target"),
                )
                .arg(
                    Arg::new("no_consistent_snapshot")
                        .long("no-consistent-snapshot")
                        .action(ArgAction::SetTrue)
                        .help("Publish without digest-addressed copies"),
                ),
        )
        .subcommand(
            Command::new("keygen")
                .about("Generate a new signing key for a role")
                .arg(
                    Arg::new("role")
                        .value_name("role")
                        .long("role")
                        .short('r')
                        .required(true)
                        .value_parser(["root", "targets", "snapshot", "timestamp"])
                        .help("Role the key signs for"),
                )
                .arg(
                    Arg::new("out")
                        .value_name("key_file")
                        .long("out")
                        .short('o')
                        .required(true)
                        .help("Key file"),
                ),
        )
        .subcommand(
            Command::new("show")
                .about("Print the trust metadata in a directory")
                .arg(
                    Arg::new("metadata_dir")
                        .value_name("metadata_dir")
                        .long("metadata-dir")
                        .short('m')
                        .required(true)
                        .help("Metadata directory"),
                ),
        )
        .get_matches();

    let verbose = matches.get_flag("verbose");
    let debug = matches.get_flag("debug");
    let audit_enabled = matches.get_flag("audit");
    let audit_file = matches.get_one::<String>("audit-file").map(|s| s.as_str());

    env_logger::builder()
        .format_timestamp(None)
        .format_level(false)
        .format_module_path(false)
        .format_target(false)
        .filter_level(if debug {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    // Initialize audit logging if enabled
    if audit_enabled || audit_file.is_some() {
        let destination = match audit_file {
            Some(path) => LogDestination::File(path.to_string()),
            None => LogDestination::Stderr,
        };
        audit::init(AuditConfig {
            enabled: true,
            destination,
            json_format: true,
            filter: "upseal::audit=info".to_string(),
        });
    }

    if let Some(matches) = matches.subcommand_matches("init-repo") {
        handle_init_repo(matches, verbose)?;
    } else if let Some(matches) = matches.subcommand_matches("keygen") {
        let role = matches
            .get_one::<String>("role")
            .map(|s| s.as_str())
            .ok_or(TrustError::UsageError("Missing key role"))?;
        let out_file = matches
            .get_one::<String>("out")
            .map(|s| s.as_str())
            .ok_or(TrustError::UsageError("Missing key file"))?;
        let role: RoleType = role.parse()?;
        let key = SigningKey::generate(role)?;
        key.to_file(out_file)?;
        audit::log_key_generation(&audit::new_correlation_id(), &role.to_string(), key.key_id());
        println!("Secret key saved to [{out_file}]");
        println!("Key ID: {}", key.key_id());
    } else if let Some(matches) = matches.subcommand_matches("show") {
        handle_show(matches, verbose)?;
    } else {
        // No subcommand: serve one line-based JSON request from stdin.
        let mut line = String::new();
        let request = match std::io::stdin().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.as_str()),
        };
        let response = dispatch::handle_line(request);
        println!("{}", response.to_line());
        std::process::exit(response.exit_code());
    }
    Ok(())
}

/// Handle the init-repo command: sign and publish the metadata hierarchy
/// together with the staged targets.
fn handle_init_repo(matches: &clap::ArgMatches, verbose: bool) -> Result<(), TrustError> {
    let repo_dir = matches
        .get_one::<String>("repo_dir")
        .map(|s| s.as_str())
        .ok_or(TrustError::UsageError("Missing repository directory"))?;
    let repo_dir = Path::new(repo_dir);

    let version: u64 = matches
        .get_one::<String>("version")
        .map(|s| s.parse().unwrap_or(1))
        .unwrap_or(1);

    let consistent_snapshot = !matches.get_flag("no_consistent_snapshot");

    // Reuse the signing keys from an earlier run so republishing advances
    // versions under the same root of trust.
    let keys_dir = repo_dir.join("keys");
    let keys = if keys_dir.join("root.json").exists() {
        log::debug!("Loading signing keys from [{}]", keys_dir.display());
        KeySet::load_from_dir(&keys_dir)?
    } else {
        let keys = KeySet::generate()?;
        keys.save_to_dir(&keys_dir)?;
        println!("Signing keys saved to [{}]", keys_dir.display());
        keys
    };

    let mut builder = MetadataBuilder::new(&keys)
        .with_version(version)
        .with_consistent_snapshot(consistent_snapshot);
    if let Some(base_url) = matches.get_one::<String>("base_url") {
        builder = builder.with_base_url(base_url.as_str());
    }

    let mut staged = 0usize;
    if let Some(specs) = matches.get_many::<String>("target") {
        for spec in specs {
            let (path, file) = spec
                .split_once('=')
                .ok_or(TrustError::UsageError("Target must be given as PATH=FILE"))?;
            builder.add_target_file(path, file)?;
            staged += 1;
            if verbose {
                println!("Staged target [{path}] from [{file}]");
            }
        }
    }
    if matches.get_flag("sample") {
        builder.add_target_bytes(SAMPLE_TARGET_PATH, SAMPLE_TARGET.to_vec())?;
        staged += 1;
    }

    builder.build_all()?;
    builder.publish(repo_dir)?;

    println!("Repository published:");
    println!("  Version: {version}");
    println!("  Targets: {staged}");
    println!("  Consistent snapshot: {consistent_snapshot}");
    println!(
        "  Trusted root: {}",
        repo_dir.join("metadata").join("root.json").display()
    );
    println!("\nSaved to: {}", repo_dir.display());
    Ok(())
}

/// Handle the show command: print version, expiry, and signature count for
/// each role document found in the directory.
fn handle_show(matches: &clap::ArgMatches, verbose: bool) -> Result<(), TrustError> {
    let dir = matches
        .get_one::<String>("metadata_dir")
        .map(|s| s.as_str())
        .ok_or(TrustError::UsageError("Missing metadata directory"))?;
    let dir = Path::new(dir);

    println!("Trust metadata in [{}]:", dir.display());
    for role in RoleType::ALL {
        let path = dir.join(role.file_name());
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                println!("  {:<10} (not present)", role.to_string());
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        let envelope = SignedMetadata::from_bytes(&bytes, role)?;
        println!(
            "  {:<10} version {:<6} expires {}  signatures {}",
            role.to_string(),
            envelope.signed_version().unwrap_or(0),
            envelope.signed_expires().unwrap_or("(unknown)"),
            envelope.signatures.len()
        );
        if verbose {
            for signature in &envelope.signatures {
                println!("      key {}", signature.keyid);
            }
        }
    }
    Ok(())
}

fn main() -> Result<(), TrustError> {
    let res = start();
    match res {
        Ok(_) => {}
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
    Ok(())
}
