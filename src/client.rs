//! One client run: replay handling, request assembly, delivery, test-mode
//! verification and the final scrub.

use std::io;
use std::net::Ipv4Addr;

use clap::Parser;
use rand::RngCore;
use tracing::{error, info, warn};
use zeroize::Zeroize;

use crate::access;
use crate::assembler::{self, TokenPlan};
use crate::cli::Cli;
use crate::config::{AllowSource, ClientOptions};
use crate::dns_resolver::{HostResolver, SystemResolver};
use crate::engine::{EncodingContext, SpaContext, PROTOCOL_VERSION};
use crate::error::{ClientError, EngineCall};
use crate::exit::{self, ExitStatus};
use crate::external_ip;
use crate::history;
use crate::keys::{self, KeyMaterial};
use crate::logging::LogLevel;
use crate::message_type;
use crate::nat;
use crate::notice;
use crate::prompt::{PasswordPrompt, ReaderPrompt, TerminalPrompt};
use crate::transmit;
use crate::verify::{self, Verification};
use crate::{CLIENT_NAME, CLIENT_VERSION};

/// Collaborators a run talks to outside its own process state.
pub struct RunEnv<'a> {
    pub resolver: &'a dyn HostResolver,
    pub prompt: &'a mut dyn PasswordPrompt,
    pub rng: &'a mut dyn RngCore,
}

/// What to do with the parsed command line after consulting the saved
/// invocation.
#[derive(Debug)]
pub enum Invocation {
    /// Run with the arguments as given.
    Fresh,
    /// Run with the saved arguments. The given ones have been scrubbed.
    Replay(Box<Cli>),
    /// Stop now. The given arguments have been scrubbed.
    Exit(ExitStatus),
}

/// Applies `--show-last`, `--last-cmd` and argument saving. Failures to read
/// or write the saved invocation only warn; the fresh arguments are used.
pub fn resolve_invocation(cli: &mut Cli, argv: &[String]) -> Invocation {
    let path = match history::save_file_path(cli.save_args_file.as_deref()) {
        Ok(path) => Some(path),
        Err(err) => {
            warn!("{err}");
            None
        }
    };

    if cli.show_last {
        let status = match path.as_deref().map(history::show_last) {
            Some(Ok(())) => ExitStatus::Success,
            Some(Err(err)) => {
                error!("{err}");
                ExitStatus::Failure
            }
            None => ExitStatus::Failure,
        };
        cli.free_secrets();
        return Invocation::Exit(status);
    }

    let Some(path) = path else {
        return Invocation::Fresh;
    };

    if cli.last_cmd {
        match history::load_last(&path) {
            Ok(args) => {
                let replay = std::iter::once(CLIENT_NAME.to_string()).chain(args);
                match Cli::try_parse_from(replay) {
                    Ok(mut last) => {
                        last.verbose = last.verbose.max(cli.verbose);
                        cli.free_secrets();
                        return Invocation::Replay(Box::new(last));
                    }
                    Err(err) => warn!("Could not parse saved arguments: {err}"),
                }
            }
            Err(err) => warn!("{err}"),
        }
        return Invocation::Fresh;
    }

    if !cli.no_save_args {
        if let Err(err) = history::save_args(argv.get(1..).unwrap_or_default(), &path) {
            warn!("{err}");
        }
    }
    Invocation::Fresh
}

/// Entry point used by the binary.
pub async fn run(mut cli: Cli, mut argv: Vec<String>) -> ExitStatus {
    let invocation = resolve_invocation(&mut cli, &argv);
    argv.zeroize();

    let mut keys = KeyMaterial::new();
    match invocation {
        Invocation::Fresh => {}
        Invocation::Replay(last) => cli = *last,
        Invocation::Exit(status) => {
            return exit::clean_exit_without_context(&mut ClientOptions::default(), &mut keys, status)
        }
    }

    if cli.version {
        notice!("{CLIENT_NAME} client {CLIENT_VERSION}, SPA protocol version {PROTOCOL_VERSION}");
        cli.free_secrets();
        return exit::clean_exit_without_context(
            &mut ClientOptions::default(),
            &mut keys,
            ExitStatus::Success,
        );
    }

    let parsed = ClientOptions::from_cli(&cli);
    cli.free_secrets();
    let mut opts = match parsed {
        Ok(opts) => opts,
        Err(err) => {
            error!("{err}");
            return exit::clean_exit_without_context(
                &mut ClientOptions::default(),
                &mut keys,
                ExitStatus::Failure,
            );
        }
    };

    let resolver = SystemResolver;
    let mut rng = rand::rngs::OsRng;
    let mut terminal = TerminalPrompt;
    let mut stdin = ReaderPrompt::new(io::stdin().lock());
    let prompt: &mut dyn PasswordPrompt = if opts.input_from_stdin {
        &mut stdin
    } else {
        &mut terminal
    };
    let mut env = RunEnv {
        resolver: &resolver,
        prompt,
        rng: &mut rng,
    };
    execute::<SpaContext>(&mut opts, &mut keys, &mut env).await
}

/// Builds, sends and (in test mode) verifies one SPA token with a fresh
/// context of type `C`. Every outcome passes through the exit funnel.
pub async fn execute<C: EncodingContext>(
    opts: &mut ClientOptions,
    keys: &mut KeyMaterial,
    env: &mut RunEnv<'_>,
) -> ExitStatus {
    let mut ctx = match C::new() {
        Ok(ctx) => ctx,
        Err(err) => {
            error!("{}", ClientError::engine("new", err));
            return exit::clean_exit_without_context(opts, keys, ExitStatus::Failure);
        }
    };

    let status = match drive(&mut ctx, opts, keys, env).await {
        Ok(()) => ExitStatus::Success,
        Err(err) => {
            error!("{err}");
            ExitStatus::Failure
        }
    };
    exit::clean_exit(Some(&mut ctx), opts, keys, status)
}

/// The external address is only looked up for access requests.
async fn allow_ip(opts: &ClientOptions) -> Result<Ipv4Addr, ClientError> {
    match &opts.allow {
        AllowSource::Explicit(ip) => Ok(*ip),
        AllowSource::ResolveHttp if opts.server_command.is_none() => {
            Ok(external_ip::resolve_external_ip(&opts.resolve_url).await?)
        }
        AllowSource::Source | AllowSource::ResolveHttp => Ok(Ipv4Addr::UNSPECIFIED),
    }
}

async fn drive<C: EncodingContext>(
    ctx: &mut C,
    opts: &ClientOptions,
    keys: &mut KeyMaterial,
    env: &mut RunEnv<'_>,
) -> Result<(), ClientError> {
    info!("{CLIENT_NAME} {CLIENT_VERSION}, SPA protocol {}", ctx.version());

    let allow_ip = allow_ip(opts).await?;
    let access_desc = access::build(opts, allow_ip, &mut *env.rng)?;
    let nat_access = nat::build(opts, &access_desc, env.resolver).await?;
    if let Some(announcement) = nat_access.as_ref().and_then(|n| n.announcement.as_deref()) {
        notice!("{announcement}");
    }

    let plan = TokenPlan {
        message_type: message_type::select_for(opts),
        access: &access_desc,
        nat_access: nat_access.as_ref().map(|n| n.value.as_str()),
    };
    assembler::configure(ctx, opts, &plan)?;

    let use_hmac = keys::acquire_keys(opts, keys, &mut *env.prompt)?;
    assembler::finalize(ctx, opts, keys, use_hmac)?;

    if opts.test || opts.verbosity > LogLevel::Warning {
        match ctx.dump() {
            Ok(dump) => notice!("\n{dump}"),
            Err(err) => warn!("Unable to dump context: {err}"),
        }
    }

    let spa_data = ctx.spa_data().during("get_spa_data")?;
    if let Some(path) = opts.save_packet.as_deref() {
        transmit::save_packet(path, spa_data)?;
    }

    if opts.test {
        info!("test mode enabled, SPA packet not actually sent.");
        match verify::verify_round_trip(&*ctx, opts, keys, access_desc.as_str())? {
            Verification::Decoded { dump: Some(dump), .. } => {
                notice!("\nDump of the Decoded Data\n{dump}");
            }
            Verification::Decoded { dump: None, .. } | Verification::NoPrivateKey { .. } => {}
        }
    } else {
        let sent = transmit::send_spa_packet(opts, spa_data, env.resolver, &mut *env.rng).await?;
        info!("send_spa_packet: bytes sent: {sent}");
    }
    Ok(())
}
