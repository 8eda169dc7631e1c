use anyhow::Result;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "screenshot-translator-rust",
    version,
    about = "Translate the text inside a screenshot region and paint it back in place"
)]
struct Cli {
    /// Screenshot to translate
    #[arg(long = "image")]
    image: Option<String>,

    /// Capture region in display coordinates: x,y,w,h
    #[arg(long = "region")]
    region: Option<String>,

    /// Size the screenshot is displayed at (WxH); defaults to its natural size
    #[arg(long = "display-size")]
    display_size: Option<String>,

    /// Target language code (default: first configured language)
    #[arg(short = 'l', long = "lang")]
    lang: Option<String>,

    /// Output path (default: <image stem>.translated.png)
    #[arg(short = 'o', long = "out")]
    out: Option<String>,

    /// Run the boundary server (empty value uses [server] addr)
    #[arg(long = "serve", num_args = 0..=1, default_missing_value = "")]
    serve: Option<String>,

    /// Route OCR and translation through a boundary server at this URL
    #[arg(long = "remote")]
    remote: Option<String>,

    /// Show target languages (default first) and exit
    #[arg(long = "show-languages")]
    show_languages: bool,

    /// Translation model name
    #[arg(short = 'm', long = "model")]
    model: Option<String>,

    /// API key (overrides OPENAI_API_KEY)
    #[arg(short = 'k', long = "key")]
    key: Option<String>,

    /// Read extra settings from a local TOML file
    #[arg(short = 'r', long = "read-settings")]
    read_settings: Option<String>,

    /// Enable verbose logging
    #[arg(long = "verbose")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    screenshot_translator_rust::logging::init(cli.verbose)?;

    let output = screenshot_translator_rust::run(screenshot_translator_rust::Config {
        image: cli.image,
        region: cli.region,
        display_size: cli.display_size,
        lang: cli.lang,
        out: cli.out,
        serve: cli.serve,
        remote: cli.remote,
        show_languages: cli.show_languages,
        model: cli.model,
        key: cli.key,
        settings_path: cli.read_settings,
        verbose: cli.verbose,
    })
    .await?;

    if !output.is_empty() {
        println!("{}", output);
    }
    Ok(())
}
