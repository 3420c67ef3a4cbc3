use anyhow::Context;
use std::collections::HashSet;
use std::time::Instant;

use multidown::cli::Args;
use multidown::core::{DownloadEngine, TaskId};
use multidown::ui::{self, DownloadSummary, ProgressManager};
use multidown::utils::logger;

#[actix::main]
async fn main() -> anyhow::Result<()> {
    let (args, config) = Args::parse_args().context("参数解析失败")?;
    logger::init_logger(logger::parse_level(&args.log_level), args.log_file.as_deref())
        .context("日志初始化失败")?;
    log::info!(
        "程序启动 {} (commit {}, 构建于 {})",
        env!("CARGO_PKG_VERSION"),
        option_env!("VERGEN_GIT_SHA").unwrap_or("unknown"),
        option_env!("VERGEN_BUILD_TIMESTAMP").unwrap_or("unknown")
    );

    let urls = args.get_urls().context("获取URL列表失败")?;
    log::info!("配置文件路径: {}", args.config);
    log::info!("{}", config.get_summary());
    println!("{}", config.get_summary());

    let engine = DownloadEngine::open(&config).context("下载引擎创建失败")?;
    let progress = ProgressManager::new();
    let started = Instant::now();

    let mut tasks = HashSet::new();
    for (index, url) in urls.iter().enumerate() {
        let destination = args.destination_for(&config, url, index, urls.len());
        let id = TaskId::derive(&destination, url);
        let label = destination
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| url.clone());
        progress.track(id, &label);

        match engine.submit(&destination, url.as_str(), Some(progress.clone())).await {
            Ok(handle) => {
                if tasks.insert(handle.id) {
                    ui::print_success(&format!("创建下载任务: {} -> {}", url, destination.display()));
                }
            }
            Err(e) => {
                log::error!("创建下载任务失败: {} - {}", url, e);
                ui::print_error(&format!("创建下载任务失败: {} - {}", url, e));
            }
        }
    }

    if tasks.is_empty() {
        eprintln!("没有可下载的任务");
        return Ok(());
    }
    println!("\n开始下载 {} 个任务... (Ctrl-C 中断并保存断点)", tasks.len());

    let tally = tokio::select! {
        tally = progress.wait_finished(tasks.len()) => tally,
        _ = tokio::signal::ctrl_c() => {
            println!("\n收到中断信号，正在保存断点...");
            log::info!("用户中断，取消全部任务");
            engine.clear_all().await?;
            engine.flush_events().await?;
            progress.tally()
        }
    };

    engine.shutdown().await?;
    progress.finish();

    let summary = DownloadSummary::from_tally(tasks.len(), &tally, started.elapsed());
    println!("{}", summary);
    log::info!("下载结束 - 成功: {}, 失败: {}", tally.succeeded, tally.failed);

    if tally.failed > 0 {
        anyhow::bail!("{} 个任务下载失败", tally.failed);
    }
    Ok(())
}
