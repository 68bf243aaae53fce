//! Auditqa CLI
//!
//! Single-shot: `auditqa "제조업 매출누락 조사기법"`. Without a query an
//! interactive line loop starts; an empty line or EOF ends it.

use auditqa_core::error::exit_codes;
use auditqa_core::{Config, Pipeline};
use clap::Parser;
use std::io::{BufRead, Write};

mod app;

use app::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        tracing::Level::INFO
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(default_level.into()),
        )
        .init();

    std::process::exit(run(cli).await);
}

async fn run(cli: Cli) -> i32 {
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("설정을 읽을 수 없습니다: {}", e);
            return exit_codes::USAGE_ERROR;
        }
    };
    let pipeline = match Pipeline::new(config) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            eprintln!("초기화 실패: {}", e);
            return exit_codes::GENERAL_ERROR;
        }
    };

    if cli.query.is_empty() {
        interactive(&pipeline).await
    } else {
        let query = cli.query.join(" ");
        if query.trim().is_empty() {
            eprintln!("사용법: auditqa \"질의\"");
            return exit_codes::USAGE_ERROR;
        }
        answer_one(&pipeline, &query).await
    }
}

async fn answer_one(pipeline: &Pipeline, query: &str) -> i32 {
    match pipeline.run_query(query).await {
        Ok(answer) => {
            println!("{}", answer);
            exit_codes::SUCCESS
        }
        Err(e) => {
            eprintln!("오류: {}", e);
            e.exit_code()
        }
    }
}

async fn interactive(pipeline: &Pipeline) -> i32 {
    println!("auditqa 대화형 모드입니다. 빈 줄을 입력하면 종료합니다.");

    let stdin = std::io::stdin();
    loop {
        print!("질문> ");
        if std::io::stdout().flush().is_err() {
            return exit_codes::GENERAL_ERROR;
        }

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => return exit_codes::SUCCESS, // EOF
            Ok(_) => {}
            Err(e) => {
                eprintln!("입력 오류: {}", e);
                return exit_codes::GENERAL_ERROR;
            }
        }

        let query = line.trim();
        if query.is_empty() {
            return exit_codes::SUCCESS;
        }

        match pipeline.run_query(query).await {
            Ok(answer) => println!("\n{}\n", answer),
            Err(e) => eprintln!("오류: {}", e),
        }
    }
}
