//! Plain-English rendering of a cron schedule, e.g. "At 09:00, Monday through Friday".

use crate::expr::{CronSchedule, FieldKind};

const MONTHS: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

const WEEKDAYS: [&str; 7] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

/// Hours listed as explicit times ("At 09:00 and 18:00") up to this many.
const MAX_LISTED_TIMES: usize = 6;

impl CronSchedule {
    /// Human-readable description, in UTC.
    pub fn describe(&self) -> String {
        let mut out = self.describe_time();

        let dom = self
            .is_restricted(FieldKind::DayOfMonth)
            .then(|| self.describe_days_of_month());
        let dow = self
            .is_restricted(FieldKind::DayOfWeek)
            .then(|| self.describe_weekdays());
        match (dom, dow) {
            (Some(dom), Some(dow)) => out.push_str(&format!(", {dom} or {dow}")),
            (Some(dom), None) => out.push_str(&format!(", {dom}")),
            (None, Some(dow)) => out.push_str(&format!(", {dow}")),
            (None, None) => {}
        }

        if self.is_restricted(FieldKind::Month) {
            let months = self.months();
            out.push_str(", only in ");
            out.push_str(&span_or_list(&months, |m| MONTHS[(m - 1) as usize].to_string()));
        }
        out
    }

    fn describe_time(&self) -> String {
        let minutes = self.minutes();
        let hours = self.hours();
        let minute_restricted = self.is_restricted(FieldKind::Minute);
        let hour_restricted = self.is_restricted(FieldKind::Hour);

        if minutes.len() == 1 && hour_restricted && hours.len() <= MAX_LISTED_TIMES {
            let times: Vec<String> = hours
                .iter()
                .map(|h| format!("{h:02}:{:02}", minutes[0]))
                .collect();
            return format!("At {}", join_list(&times));
        }

        let minute_part = if !minute_restricted {
            "Every minute".to_string()
        } else if let Some(step) = self.raw_field(FieldKind::Minute).strip_prefix("*/") {
            format!("Every {step} minutes")
        } else if minutes == [0] && !hour_restricted {
            "Every hour".to_string()
        } else if minutes.len() == 1 {
            format!("At {} minutes past the hour", minutes[0])
        } else {
            let listed: Vec<String> = minutes.iter().map(u32::to_string).collect();
            format!("At minutes {} past the hour", join_list(&listed))
        };

        if !hour_restricted {
            return minute_part;
        }

        let hour_part = if is_contiguous(&hours) {
            format!(
                "between {:02}:00 and {:02}:59",
                hours[0],
                hours[hours.len() - 1]
            )
        } else {
            let listed: Vec<String> = hours.iter().map(|h| format!("{h:02}:00")).collect();
            format!("during the {} hours", join_list(&listed))
        };
        format!("{minute_part}, {hour_part}")
    }

    fn describe_days_of_month(&self) -> String {
        let days = self.days_of_month();
        if days.len() == 1 {
            return format!("on day {} of the month", days[0]);
        }
        let text = span_or_list(&days, |d| d.to_string());
        format!("on days {text} of the month")
    }

    fn describe_weekdays(&self) -> String {
        let days = self.weekdays();
        let text = span_or_list(&days, |d| WEEKDAYS[d as usize].to_string());
        if days.len() >= 3 && is_contiguous(&days) {
            text
        } else {
            format!("on {text}")
        }
    }
}

fn is_contiguous(values: &[u32]) -> bool {
    values.len() >= 2 && values.windows(2).all(|w| w[1] == w[0] + 1)
}

/// "X through Y" for runs of three or more, otherwise a plain list.
fn span_or_list(values: &[u32], name: impl Fn(u32) -> String) -> String {
    if values.len() >= 3 && is_contiguous(values) {
        return format!(
            "{} through {}",
            name(values[0]),
            name(values[values.len() - 1])
        );
    }
    let names: Vec<String> = values.iter().map(|v| name(*v)).collect();
    join_list(&names)
}

fn join_list(items: &[String]) -> String {
    match items {
        [] => String::new(),
        [one] => one.clone(),
        [init @ .., last] => format!("{} and {last}", init.join(", ")),
    }
}
