//! Serve - run the configured servers until a shutdown signal arrives

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use ptcp_config::{Config, GlobalConfig, MultiplexerType, TcpServerConfig};
use ptcp_server::{
    ChannelSubmitter, DEFAULT_CHANNEL_CAPACITY, Dispatcher, DispatcherConfig, FramingConfig,
    KeepaliveConfig, MultiplexerKind, RateLimitConfig, Server, ServerConfig, SystemResolver,
};

use crate::output;

/// Run until SIGINT or SIGTERM, then shut every server down
pub async fn run(config: Config) -> Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        platform = std::env::consts::OS,
        servers = config.enabled_servers().count(),
        "ptcp starting"
    );

    let (submitter, receiver) = ChannelSubmitter::new(DEFAULT_CHANNEL_CAPACITY);
    let submitter = Arc::new(submitter);
    let resolver = Arc::new(SystemResolver::new(!config.global.disable_dns));

    let mut dispatcher = Dispatcher::new(dispatcher_config(&config.global))
        .context("failed to create dispatcher")?;

    let mut started = 0usize;
    for server_config in config.enabled_servers() {
        let server_config = server_config_for(&config.global, server_config);
        let endpoint = server_config.bind_display();
        let name = server_config.input_name.clone();

        let server = Server::builder(server_config, submitter.clone())
            .resolver(resolver.clone())
            .build();
        match dispatcher.add_server(server) {
            Ok(_) => started += 1,
            Err(e) => error!(input = %name, endpoint = %endpoint, error = %e, "server failed to start"),
        }
    }

    if started == 0 {
        anyhow::bail!("no server could be started");
    }

    drop(submitter);

    let handle = dispatcher.handle();
    let dispatcher_thread = std::thread::Builder::new()
        .name("ptcp-dispatcher".into())
        .spawn(move || dispatcher.run())
        .context("failed to spawn dispatcher thread")?;

    let output_cancel = CancellationToken::new();
    let writer = tokio::spawn(output::write_messages(receiver, output_cancel.clone()));

    info!(servers = started, "ptcp running");

    wait_for_shutdown().await;
    info!("shutdown signal received, stopping servers...");
    handle.stop();

    let result = tokio::task::spawn_blocking(move || dispatcher_thread.join())
        .await
        .context("failed to join dispatcher thread")?;
    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "dispatcher error"),
        Err(_) => error!("dispatcher thread panicked"),
    }

    // Nothing submits once the dispatcher has returned
    output_cancel.cancel();

    match writer.await {
        Ok(Ok(written)) => info!(messages = written, "ptcp shutdown complete"),
        Ok(Err(e)) => warn!(error = %e, "output writer failed"),
        Err(e) => warn!(error = %e, "output writer panicked"),
    }

    Ok(())
}

fn dispatcher_config(global: &GlobalConfig) -> DispatcherConfig {
    DispatcherConfig {
        worker_threads: global.worker_threads,
        poll_interval: global.poll_interval,
        multiplexer: match global.multiplexer {
            MultiplexerType::Epoll => MultiplexerKind::Epoll,
            MultiplexerType::Poll => MultiplexerKind::Poll,
        },
    }
}

fn server_config_for(global: &GlobalConfig, server: &TcpServerConfig) -> ServerConfig {
    ServerConfig {
        address: server.address.clone(),
        port: server.port.clone(),
        input_name: server.input_name.clone(),
        ruleset: server.ruleset.clone(),
        framing: FramingConfig {
            max_line_size: global.max_message_size,
            octet_counting: server.octet_counting,
            additional_delimiter: server.additional_frame_delimiter,
            lf_delimiter: !server.disable_lf_delimiter,
            discard_truncated: server.discard_truncated,
            sp_framing_fix: server.sp_framing_fix,
            max_frame_size: server.max_frame_size,
            multi_line: server.multi_line,
        },
        keepalive: KeepaliveConfig {
            enabled: server.keepalive.enabled,
            probes: server.keepalive.probes,
            time: server.keepalive.time,
            interval: server.keepalive.interval,
        },
        notify_on_close: server.notify_on_close,
        notify_on_open: server.notify_on_open,
        max_sessions: server.max_sessions,
        starvation_max_reads: server.starvation_max_reads,
        backlog: server.backlog,
        rate_limit: RateLimitConfig {
            interval: server.rate_limit.interval,
            burst: server.rate_limit.burst,
        },
    }
}

/// Wait for SIGINT or SIGTERM
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
