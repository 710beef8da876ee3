//! User-facing texts.

use remindbot_cron::CronSchedule;
use remindbot_storage::JobRecord;

pub const START_TEXT: &str = "Welcome to RememberOrDismember! 🐟\n\n\
Are you tired of having a goldfish memory? Well, you're in luck! I'm here to help you remember things, \
or else... *sharpens virtual knife* 🗡️\n\n\
Whether it's a one-time task or something you need to be reminded of regularly, I'll make sure you don't forget. \
Because if you do... well, let's just say I have a very creative way of helping people remember things.\n\n\
There are two types of reminders you can set:\n\
1. Once-off reminders - Perfect for one-time tasks or events (or else...)\n\
2. Recurring reminders - Great for regular tasks that need to be done periodically (or you'll be dismembered periodically)\n\n\
Available commands:\n\
/start - Show this help menu\n\
/newjob - Create a new reminder job\n\
/listjobs - List all your active reminder jobs\n\
/canceljob-<jobID> - Cancel a specific job (e.g. /canceljob-123)\n\n\
To create a new job, use /newjob and follow the prompts to set up your reminder. \
Remember, I'm watching... always watching... 👀";

pub const NAME_PROMPT: &str = "Please enter a name for your job.";
pub const MESSAGE_PROMPT: &str = "Please enter the message that should be sent to you.";
pub const TYPE_PROMPT: &str = "Select job type.";
pub const ONCE_OFF_PROMPT: &str =
    "Please input the UTC date and time in the format YYYY-MM-DD HH:MM:SS that the once-off message should be sent.";
pub const RECURRING_PROMPT: &str =
    "Please input the UTC cron expression (e.g. 0 9 * * 1-5) that the recurring message should be sent.";
pub const RECURRING_ASSISTED_HINT: &str =
    " You can also describe the schedule in plain words and I will help you work it out.";

pub const UNTRACEABLE_TEXT: &str = "Unable to trace message context.\n\n\
Did you mean to enter a command? Please input /start to view the list of available commands.";
pub const UNKNOWN_COMMAND_TEXT: &str = "Received unknown command.";
pub const UNKNOWN_QUERY_TEXT: &str = "Received unknown query data.";
pub const UNHANDLED_TEXT: &str = "An error occurred processing the request, please try again.";
pub const NO_JOBS_TEXT: &str = "You have no jobs yet. Input /newjob to create a new job.";
pub const CANCEL_HINT: &str = "To cancel a job, input the command /canceljob-<jobID> where jobID is the ID of the \
job you want to cancel.\n\nFor example, if jobID is 123, you would input /canceljob-123.";

/// Escape text for Telegram's HTML parse mode.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Cron description, or empty when the expression does not parse.
pub fn describe_cron(expression: &str) -> String {
    CronSchedule::parse(expression)
        .map(|s| s.describe())
        .unwrap_or_default()
}

/// HTML summary shown with the "Confirm" button.
pub fn confirmation_summary(name: &str, message: &str, recurring: bool, schedule: &str) -> String {
    let schedule_text = if recurring {
        format!(
            "Recurring at UTC <b>{}</b> ({})",
            escape_html(schedule),
            escape_html(&describe_cron(schedule))
        )
    } else {
        format!("Once-off, at UTC {}", escape_html(schedule))
    };
    format!(
        "Please confirm the following job details:\n\n<b>Job name:</b> {}\n<b>Message to send:</b> {}\n<b>Schedule:</b> {}",
        escape_html(name),
        escape_html(message),
        schedule_text
    )
}

/// Prompt shown after the job type is chosen.
pub fn schedule_prompt(recurring: bool, assisted: bool) -> String {
    match (recurring, assisted) {
        (false, _) => ONCE_OFF_PROMPT.to_string(),
        (true, false) => RECURRING_PROMPT.to_string(),
        (true, true) => format!("{RECURRING_PROMPT}{RECURRING_ASSISTED_HINT}"),
    }
}

/// Plain-text listing for /listjobs.
pub fn job_list(jobs: &[JobRecord]) -> String {
    if jobs.is_empty() {
        return NO_JOBS_TEXT.to_string();
    }

    let mut text = String::new();
    for job in jobs {
        let schedule_text = if job.is_recurring {
            format!(
                "Recurring at UTC {} ({})",
                job.schedule,
                describe_cron(&job.schedule)
            )
        } else {
            format!("Once-off, at UTC {}", job.schedule)
        };
        text.push_str(&format!(
            "Job ID: {}\nJob name: {}\nMessage: {}\nSchedule: {}\n\n",
            job.id, job.name, job.message, schedule_text
        ));
    }
    text.push_str(CANCEL_HINT);
    text
}

pub fn scheduled_text(name: &str) -> String {
    format!("Successfully scheduled job {name}")
}

pub fn cancelled_text(name: &str) -> String {
    format!("Successfully cancelled job: {name}")
}

/// What part of the bot an error came from, for the error reply.
#[derive(Debug, Clone, Copy)]
pub enum Origin {
    Command,
    Message,
    CallbackQuery,
}

pub fn error_text(origin: Origin, error: &dyn std::fmt::Display) -> String {
    let what = match origin {
        Origin::Command => "command",
        Origin::Message => "message",
        Origin::CallbackQuery => "callback query",
    };
    format!("An error occurred processing the {what}: {error}")
}
