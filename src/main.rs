mod cli;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use resource_exchange::config::ExchangeConfig;
use resource_exchange::listing::{Category, PriceKind};

#[derive(Parser)]
#[command(name = "resource-exchange", version, about = "Resource Exchange: pseudonymous marketplace for member organizations")]
struct App {
    /// Acting user id (from the identity provider)
    #[arg(long, global = true)]
    user: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the data directory, database and default config
    Init,
    /// Manage your organization
    Org {
        #[command(subcommand)]
        action: OrgAction,
    },
    /// Post and browse listings
    Listing {
        #[command(subcommand)]
        action: ListingAction,
    },
    /// Negotiate on a listing
    Thread {
        #[command(subcommand)]
        action: ThreadAction,
    },
    /// Messages received by your organization
    Inbox,
    /// Mark one message as read
    Read {
        message_id: String,
    },
    /// View or modify configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum OrgAction {
    /// Register the organization owned by --user
    Register {
        #[arg(long)]
        company: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        phone: String,
        #[arg(long)]
        address: String,
    },
    /// Show your organization and its contact record
    Show,
    /// Confirm the emailed verification code
    Verify {
        code: String,
    },
    /// Change your contact record (omitted fields are kept)
    UpdateContact {
        #[arg(long)]
        company: Option<String>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        phone: Option<String>,
        #[arg(long)]
        address: Option<String>,
    },
}

#[derive(Subcommand)]
enum ListingAction {
    /// Post a listing
    Create {
        /// offering-staff, requesting-staff, offering-special-skill, offering-tool
        #[arg(long)]
        category: Category,
        #[arg(long)]
        descriptor: String,
        /// First day (YYYY-MM-DD)
        #[arg(long)]
        from: NaiveDate,
        /// End of the window, exclusive (YYYY-MM-DD)
        #[arg(long)]
        to: NaiveDate,
        #[arg(long)]
        location: String,
        /// Outreach contact text shown on the listing
        #[arg(long)]
        contact: String,
        #[arg(long)]
        notes: Option<String>,
        /// Skill tag (offering-special-skill only, repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,
        #[arg(long)]
        price: Option<f64>,
        /// hourly, fixed, negotiable
        #[arg(long)]
        price_kind: Option<PriceKind>,
    },
    /// Open marketplace, grouped by category
    Market,
    /// Listings you posted
    Mine,
    /// Listings reserved to you
    Reserved,
    /// Threads on one of your listings
    Threads {
        listing_id: String,
    },
}

#[derive(Subcommand)]
enum ThreadAction {
    /// Contact a listing owner
    Open {
        listing_id: String,
        body: String,
    },
    /// Reply in a thread
    Reply {
        thread_id: String,
        body: String,
    },
    /// Show a thread and mark it read
    Show {
        thread_id: String,
    },
    /// Accept this thread's counterpart (listing owner only)
    Award {
        thread_id: String,
    },
    /// Negotiation state: open, awarded, void, expired
    State {
        thread_id: String,
    },
    /// Counterpart contact details, once disclosed
    Contact {
        thread_id: String,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Display the full configuration
    Show,
    /// Get a config value (dot notation: notifier.endpoint)
    Get {
        /// Config key (dot notation)
        key: String,
    },
    /// Set a config value
    Set {
        /// Config key (dot notation)
        key: String,
        /// Value (JSON: true, false, 42, "string")
        value: String,
    },
}

fn main() {
    let app = App::parse();
    resource_exchange::tracing_init::init_file_tracing(&ExchangeConfig::load().log_level);

    let user = app.user.as_deref();
    let result = match app.command {
        Commands::Init => cli::init::run(),
        Commands::Org { action } => match action {
            OrgAction::Register { company, email, phone, address } => {
                cli::org::register(user, &company, &email, &phone, &address)
            }
            OrgAction::Show => cli::org::show(user),
            OrgAction::Verify { code } => cli::org::verify(user, &code),
            OrgAction::UpdateContact { company, email, phone, address } => cli::org::update_contact(
                user,
                company.as_deref(),
                email.as_deref(),
                phone.as_deref(),
                address.as_deref(),
            ),
        },
        Commands::Listing { action } => match action {
            ListingAction::Create {
                category,
                descriptor,
                from,
                to,
                location,
                contact,
                notes,
                tags,
                price,
                price_kind,
            } => cli::listing::create(
                user,
                cli::listing::CreateArgs {
                    category,
                    descriptor,
                    from,
                    to,
                    location,
                    contact,
                    notes,
                    tags,
                    price,
                    price_kind,
                },
            ),
            ListingAction::Market => cli::listing::market(user),
            ListingAction::Mine => cli::listing::mine(user),
            ListingAction::Reserved => cli::listing::reserved(user),
            ListingAction::Threads { listing_id } => cli::listing::threads(user, &listing_id),
        },
        Commands::Thread { action } => match action {
            ThreadAction::Open { listing_id, body } => cli::thread::open(user, &listing_id, &body),
            ThreadAction::Reply { thread_id, body } => cli::thread::reply(user, &thread_id, &body),
            ThreadAction::Show { thread_id } => cli::thread::show(user, &thread_id),
            ThreadAction::Award { thread_id } => cli::thread::award(user, &thread_id),
            ThreadAction::State { thread_id } => cli::thread::state(user, &thread_id),
            ThreadAction::Contact { thread_id } => cli::thread::contact(user, &thread_id),
        },
        Commands::Inbox => cli::inbox::list(user),
        Commands::Read { message_id } => cli::inbox::read(user, &message_id),
        Commands::Config { action } => match action {
            ConfigAction::Show => cli::config::run_show(),
            ConfigAction::Get { key } => cli::config::run_get(&key),
            ConfigAction::Set { key, value } => cli::config::run_set(&key, &value),
        },
    };

    if let Err(e) = result {
        cli::report(&e);
        std::process::exit(1);
    }
}
