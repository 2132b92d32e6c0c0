use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use clap::{Arg, Command};
use tokio::runtime::Handle;
use tracing::{error, info};

use fcsim::config::NodeConfig;
use fcsim::logging::{LogOutput, init_logging, parse_log_level};
use fcsim::models::{FireRequest, NedPosition, NedVelocity, TargetUpdate};
use fcsim::node::FireControlNode;
use fcsim::notify::LogNotifier;
use fcsim::payload::{AzimuthStatus, to_json};

fn main() {
    let matches = Command::new("fcsim")
        .version("0.1.0")
        .about("射撃管制ノード (Fire Control Node)")
        .long_about("目標追跡・射撃指令・砲塔旋回を行う射撃管制ノードの中核です。\n\
                     設定ファイル(.yaml)を読み込み、制御ループと掃除タスクを起動します。")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("ノード設定ファイル(.yaml)のパスを指定")
                .long_help("ノード設定ファイル(.yaml)のパスを指定します。\n\
                           指定しない場合、既定値で起動します。")
        )
        .arg(
            Arg::new("info")
                .short('i')
                .long("info")
                .action(clap::ArgAction::SetTrue)
                .help("設定の概要のみ表示して終了")
                .conflicts_with("demo")
        )
        .arg(
            Arg::new("demo")
                .short('d')
                .long("demo")
                .action(clap::ArgAction::SetTrue)
                .help("目標登録・射撃指令・砲塔旋回のデモを実行")
                .conflicts_with("info")
        )
        .arg(
            Arg::new("duration")
                .long("duration")
                .value_name("SECS")
                .value_parser(clap::value_parser!(u64))
                .help("指定秒数だけ動作して終了（省略時はCtrl-Cまで）")
        )
        .arg(
            Arg::new("simulate")
                .long("simulate")
                .value_name("COUNT")
                .value_parser(clap::value_parser!(usize))
                .help("指定数の模擬目標を生成してレジストリへ投入")
        )
        .arg(
            Arg::new("log-output")
                .long("log-output")
                .value_name("TARGET")
                .help("ログ出力先 (console, file, both)")
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .help("ログレベル (trace, debug, info, warn, error)")
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(clap::ArgAction::Count)
                .help("詳細出力レベル (-v: debug, -vv: trace)")
        )
        .get_matches();

    println!("射撃管制ノード (Fire Control Node) - fcsim v0.1.0");
    println!();

    let mut config = match matches.get_one::<String>("config") {
        Some(path) => match NodeConfig::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("エラー: {}", e);
                std::process::exit(1);
            }
        },
        None => NodeConfig::default(),
    };

    if let Some(count) = matches.get_one::<usize>("simulate") {
        config.simulator.enabled = true;
        config.simulator.target_count = *count;
    }

    if matches.get_flag("info") {
        config.print_summary();
        return;
    }

    let mut log_config = config.log_config();
    if let Some(output) = matches.get_one::<String>("log-output") {
        match LogOutput::from_str(output) {
            Ok(output) => log_config.output = output,
            Err(e) => {
                eprintln!("エラー: {}", e);
                std::process::exit(1);
            }
        }
    }
    if let Some(level) = matches.get_one::<String>("log-level") {
        log_config.level = parse_log_level(level);
    }
    match matches.get_count("verbose") {
        0 => {}
        1 => log_config.level = tracing::Level::DEBUG,
        _ => log_config.level = tracing::Level::TRACE,
    }

    // ガードはプロセス終了まで保持する
    let _log_guard = match init_logging(&log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("ログ初期化エラー: {}", e);
            std::process::exit(1);
        }
    };

    let duration = matches.get_one::<u64>("duration").copied().map(Duration::from_secs);
    let result = if matches.get_flag("demo") {
        run_demo(config)
    } else {
        run_node(config, duration)
    };

    if let Err(e) = result {
        error!("異常終了: {}", e);
        eprintln!("エラー: {}", e);
        std::process::exit(1);
    }
}

fn build_runtime() -> Result<tokio::runtime::Runtime, Box<dyn std::error::Error>> {
    Ok(tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("fcsim-worker")
        .build()?)
}

/// ノードを起動して周期タスクを動かす
fn run_node(config: NodeConfig, duration: Option<Duration>) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = build_runtime()?;

    runtime.block_on(async move {
        let node = FireControlNode::new(config, Handle::current())
            .with_notifier(Arc::new(LogNotifier::new("log")));
        let handle = node.start();

        match duration {
            Some(duration) => {
                info!("{}秒間動作します", duration.as_secs());
                tokio::time::sleep(duration).await;
            }
            None => {
                info!("プロセスが停止されるまで動作します");
                wait_forever().await;
            }
        }

        handle.shutdown().await;
        println!("{}", to_json(&node.status())?);
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}

async fn wait_forever() {
    std::future::pending::<()>().await
}

/// 目標登録から射撃完了、砲塔旋回までを一通り実行するデモ
fn run_demo(mut config: NodeConfig) -> Result<(), Box<dyn std::error::Error>> {
    config.turret.initial_azimuth_deg = 350.0;
    config.turret.rotation_speed_deg_s = 30.0;
    let runtime = build_runtime()?;

    runtime.block_on(async move {
        let node = FireControlNode::new(config, Handle::current())
            .with_notifier(Arc::new(LogNotifier::new("demo")));

        println!("=== 目標登録 ===");
        node.registry().upsert(TargetUpdate::new(
            "T-1",
            NedPosition::new(1000.0, 1000.0, -500.0),
            NedVelocity::new(-10.0, 0.0, 0.0),
        ))?;
        let target = node.registry().get("T-1")?;
        println!("{}", to_json(&target)?);
        println!();

        println!("=== 射撃指令 ===");
        let ack = node.coordinator().submit(FireRequest::new("F-1", "T-1"))?;
        println!("{}", to_json(&ack)?);

        let firing = node.coordinator().config().firing_duration;
        tokio::time::sleep(firing + Duration::from_millis(50)).await;
        let status = node.coordinator().get_status("F-1")?;
        println!("状態: {} (方位 {:.1}°, 仰角 {:.1}°, 射程 {:.1}m)",
                 status.state, status.azimuth, status.elevation, status.range_m);

        let resubmit = node.coordinator().submit_ack(FireRequest::new("F-1", "T-1"));
        println!("再送: {}", to_json(&resubmit)?);
        println!();

        println!("=== 砲塔旋回 ===");
        node.turret().set_target(90.0)?;
        let dt = node.config().turret.tick_s;
        let mut ticks = 0;
        while !node.turret().is_at_target() {
            node.step(dt);
            ticks += 1;
            println!("tick {}: {}", ticks, to_json(&AzimuthStatus::of(node.turret()))?);
        }
        println!("{}ティックで到達", ticks);
        println!();

        println!("=== イベント ===");
        for event in node.coordinator().events() {
            println!("{}", to_json(&event)?);
        }

        Ok::<(), Box<dyn std::error::Error>>(())
    })
}
