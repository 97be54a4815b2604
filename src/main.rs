// SPDX-License-Identifier: MPL-2.0

use std::error::Error;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use hashtribe::HashTribe;
use hashtribe::config::{APP_NAME, Config};
use hashtribe::routes::Navigation;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::error;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

/// Command-line client for HashTribe.
#[derive(Parser, Debug)]
#[command(name = "hashtribe", author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show who is signed in
    Status,
    /// Sign in with email and password
    Login {
        email: String,
        /// Read from stdin when unset
        #[arg(long, env = "HASHTRIBE_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Create an account
    Signup {
        email: String,
        username: String,
        /// Full name
        #[arg(required = true, num_args = 1..)]
        name: Vec<String>,
        #[arg(long, env = "HASHTRIBE_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Start a browser sign-in
    Oauth {
        #[arg(value_enum)]
        provider: Provider,
    },
    /// Finish a browser sign-in from the redirect URL
    Callback { url: Url },
    /// Sign out
    Logout,
    /// Newest posts across tribes
    Feed,
    /// List tribes
    Tribes,
    /// Show a tribe, its members, posts and topics
    Tribe { slug: String },
    /// Show a topic and its replies
    Topic { id: String },
    /// List competitions
    Competitions,
    /// Like or unlike a feed post
    Like { post_id: String },
    /// Resolve a client route
    Route { path: String },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Provider {
    Github,
    Google,
}

type CliResult = Result<(), Box<dyn Error>>;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{APP_NAME}: {e}");
            return ExitCode::FAILURE;
        }
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .thread_name("hashtribe-async")
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("{APP_NAME}: failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(&config, cli.command)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("{APP_NAME}: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: &Config, command: Command) -> CliResult {
    let app = HashTribe::connect(config)?;
    app.start().await;

    match command {
        Command::Status => print_status(&app),
        Command::Login { email, password } => {
            let password = read_password(password).await?;
            app.auth().sign_in_with_email(&email, &password).await?;
            print_status(&app);
        }
        Command::Signup {
            email,
            username,
            name,
            password,
        } => {
            let password = read_password(password).await?;
            let full_name = name.join(" ");
            let response = app
                .auth()
                .sign_up_with_email(&email, &password, &username, &full_name)
                .await?;
            if response.session.is_none() {
                println!("Account created! Check your email to verify your account.");
            } else {
                print_status(&app);
            }
        }
        Command::Oauth { provider } => {
            let url = match provider {
                Provider::Github => app.auth().sign_in_with_github().await?,
                Provider::Google => app.auth().sign_in_with_google().await?,
            };
            println!("Continue in your browser: {url}");
            println!("Then run: hashtribe callback '<redirect url>'");
        }
        Command::Callback { url } => {
            app.auth().complete_oauth_redirect(&url).await?;
            app.auth().refresh_session().await;
            print_status(&app);
        }
        Command::Logout => {
            app.auth().sign_out().await?;
            println!("Signed out.");
        }
        Command::Feed => {
            app.load_feed().await;
            let state = app.posts().state();
            check(state.error)?;
            print_posts(&state.posts);
        }
        Command::Tribes => {
            app.load_tribes().await;
            let state = app.tribes().state();
            check(state.error)?;
            for entry in &state.tribes {
                let marker = match entry.user_role {
                    Some(role) => format!(" [{role:?}]"),
                    None => String::new(),
                };
                println!(
                    "{:<24} {:>4} members  {}{}",
                    entry.tribe.slug, entry.member_count, entry.tribe.name, marker
                );
            }
        }
        Command::Tribe { slug } => {
            app.tribes().fetch_tribe_by_slug(&slug).await;
            let state = app.tribes().state();
            check(state.error)?;
            let Some(tribe) = state.current_tribe else {
                return Err(format!("no tribe {slug}").into());
            };

            println!("{} ({:?})", tribe.name, tribe.visibility);
            if let Some(description) = &tribe.description {
                println!("{description}");
            }
            println!("\n{} members", state.members.len());
            for member in &state.members {
                let name = member.users.as_ref().map_or(member.user_id.as_str(), |u| u.username.as_str());
                println!("  @{name} ({:?})", member.role);
            }

            app.load_tribe_posts(&tribe.id).await;
            println!("\nPosts");
            print_posts(&app.posts().state().posts);

            app.topics().fetch_topics(&tribe.id).await;
            println!("\nTopics");
            for topic in &app.topics().state().topics {
                println!(
                    "  {}  {}  ({} replies, {} upvotes)",
                    topic.topic.id, topic.topic.title, topic.topic.reply_count, topic.topic.upvotes
                );
            }
        }
        Command::Topic { id } => {
            app.topics().fetch_topic_by_id(&id).await;
            let state = app.topics().state();
            check(state.error)?;
            if let Some(topic) = state.current_topic {
                println!("{}\n\n{}\n", topic.topic.title, topic.topic.content);
            }
            for reply in &state.replies {
                let author = reply.user.as_ref().map_or("unknown", |u| u.username.as_str());
                println!("@{author}: {}", reply.reply.content);
                if let Some(code) = &reply.reply.code_snippet {
                    println!("    {}", code.replace('\n', "\n    "));
                }
            }
        }
        Command::Competitions => {
            app.competitions().fetch_competitions().await;
            let state = app.competitions().state();
            check(state.error)?;
            for competition in &state.competitions {
                println!(
                    "{:<32} {:?}/{:?}  starts {}",
                    competition.slug,
                    competition.status,
                    competition.difficulty,
                    competition.start_time.format("%Y-%m-%d %H:%M UTC")
                );
            }
        }
        Command::Like { post_id } => {
            app.load_feed().await;
            app.toggle_like(&post_id).await?;
            match app.posts().state().posts.iter().find(|p| p.id == post_id) {
                Some(post) => println!(
                    "{} {} ({} likes)",
                    if post.liked_by_user { "Liked" } else { "Unliked" },
                    post.id,
                    post.likes_count
                ),
                None => return Err(format!("post {post_id} is not in the feed").into()),
            }
        }
        Command::Route { path } => match app.navigate(&path) {
            Navigation::Pending => println!("pending session check"),
            Navigation::Render(route) => println!("render {route:?}"),
            Navigation::Redirect(target) => println!("redirect {target}"),
        },
    }
    Ok(())
}

fn check(error: Option<String>) -> CliResult {
    match error {
        Some(message) => Err(message.into()),
        None => Ok(()),
    }
}

fn print_status(app: &HashTribe) {
    let state = app.auth().state();
    match (&state.user, &state.profile) {
        (Some(_), Some(profile)) => println!("Signed in as @{}", profile.username),
        (Some(user), None) => println!(
            "Signed in as {} (profile not created yet)",
            user.email.as_deref().unwrap_or(&user.id)
        ),
        (None, _) => println!("Not signed in."),
    }
}

fn print_posts(posts: &[hashtribe::models::Post]) {
    for post in posts {
        let author = post.user.as_ref().map_or("unknown", |u| u.username.as_str());
        let tribe = post.tribe.as_ref().map_or("", |t| t.slug.as_str());
        let heart = if post.liked_by_user { "♥" } else { "♡" };
        println!(
            "{}  @{author} in #{tribe}  {heart} {}",
            post.id, post.likes_count
        );
        if let Some(content) = &post.content {
            println!("    {content}");
        }
    }
}

async fn read_password(password: Option<String>) -> Result<String, Box<dyn Error>> {
    if let Some(password) = password {
        return Ok(password);
    }

    eprint!("Password: ");
    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await?;
    let password = line.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        return Err("a password is required".into());
    }
    Ok(password)
}
