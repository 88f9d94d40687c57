//! services/send_window.rs
//! Cálculo del próximo envío y de la ventana permitida (quiet hours,
//! tope diario y throttle por hora). Funciones puras.

use chrono::{DateTime, Duration, NaiveTime, TimeZone, Timelike, Utc};

use crate::config::engine_config::QuietWindow;
use crate::models::outbox_model::SendCounts;
use crate::models::sequence_model::{Rules, Step, TimeOfDay};

/// `now` + desplazamiento del paso, fijando la hora del día si el paso la define
/// (mismo día, nunca el siguiente) y saliendo de las quiet hours si aplican.
pub fn next_time(step: &Step, now: DateTime<Utc>, rules: &Rules, quiet: QuietWindow) -> DateTime<Utc> {
    let mut at = add_saturating(now, step.delay());
    if let Some(time_of_day) = step.time_of_day() {
        at = pin_time_of_day(at, time_of_day);
    }
    if rules.quiet_hours {
        at = shift_out_of_quiet(at, quiet);
    }
    at
}

pub fn pin_time_of_day(at: DateTime<Utc>, time_of_day: TimeOfDay) -> DateTime<Utc> {
    at_hour_minute(at, time_of_day.hour, time_of_day.minute).unwrap_or(at)
}

pub fn in_quiet_window(at: DateTime<Utc>, quiet: QuietWindow) -> bool {
    let hour = at.hour();
    if quiet.start_hour == quiet.end_hour {
        return false;
    }
    if quiet.start_hour < quiet.end_hour {
        hour >= quiet.start_hour && hour < quiet.end_hour
    } else {
        hour >= quiet.start_hour || hour < quiet.end_hour
    }
}

/// Si `at` cae en la ventana de silencio, devuelve el final de la ventana.
pub fn shift_out_of_quiet(at: DateTime<Utc>, quiet: QuietWindow) -> DateTime<Utc> {
    if !in_quiet_window(at, quiet) {
        return at;
    }
    let Some(end_today) = at_hour_minute(at, quiet.end_hour, 0) else {
        return at;
    };
    if end_today > at {
        end_today
    } else {
        add_saturating(end_today, Duration::days(1))
    }
}

pub fn start_of_day(at: DateTime<Utc>) -> DateTime<Utc> {
    at_hour_minute(at, 0, 0).unwrap_or(at)
}

/// Primer instante permitido a partir de `candidate`.
///
/// `counts` describe los envíos de la cuenta en el día UTC de `candidate`
/// y en la hora anterior a `candidate`.
pub fn next_allowed(
    candidate: DateTime<Utc>,
    rules: &Rules,
    quiet: QuietWindow,
    counts: &SendCounts,
) -> DateTime<Utc> {
    let mut at = candidate;

    if let Some(cap) = rules.daily_cap {
        if counts.today >= cap {
            at = at.max(add_saturating(start_of_day(candidate), Duration::days(1)));
        }
    }

    if let Some(limit) = rules.throttle_per_hour {
        if counts.last_hour >= limit {
            let oldest = counts.oldest_in_last_hour.unwrap_or(candidate);
            at = at.max(add_saturating(oldest, Duration::hours(1)));
        }
    }

    if rules.quiet_hours {
        at = shift_out_of_quiet(at, quiet);
    }
    at
}

/// Suma sin desbordar: pasado el máximo de chrono se queda en `DateTime::MAX_UTC`.
pub fn add_saturating(at: DateTime<Utc>, delta: Duration) -> DateTime<Utc> {
    at.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn at_hour_minute(at: DateTime<Utc>, hour: u32, minute: u32) -> Option<DateTime<Utc>> {
    let time = NaiveTime::from_hms_opt(hour, minute, 0)?;
    Some(Utc.from_utc_datetime(&at.date_naive().and_time(time)))
}
