use anyhow::Result;
use clap::Parser;
use iam_realtime::{run, RunOptions};
use std::path::PathBuf;

/// IAM 实时更新通道客户端
#[derive(Parser, Debug)]
#[command(name = "iam-realtime")]
#[command(about = "Live update channel for IAM transcriptions")]
#[command(version)]
struct Args {
    /// 登录用户 ID
    #[arg(short, long, env = "IAM_USER_ID")]
    user_id: String,

    /// WebSocket 基础地址，覆盖配置文件
    #[arg(short, long)]
    endpoint: Option<String>,

    /// 认证令牌
    #[arg(short, long)]
    token: Option<String>,

    /// 配置文件路径
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 日志过滤规则，例如 `info` 或 `iam_realtime=debug`
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    run(RunOptions {
        user_id: args.user_id,
        endpoint: args.endpoint,
        token: args.token,
        config_path: args.config,
        log_level: args.log_level,
    })
    .await
}
