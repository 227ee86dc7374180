/// Lifecycle of a job as a whole. `Done` is terminal; a Done job is
/// removed from the table by the control thread's sweep, never by the
/// notification handler.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(u8)]
pub enum JobState {
    Running = 0,
    Stopped = 1,
    Done = 2,
}

impl JobState {
    pub(crate) fn from_u8(raw: u8) -> JobState {
        match raw {
            1 => JobState::Stopped,
            2 => JobState::Done,
            _ => JobState::Running,
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            JobState::Running => formatter.write_str("Running"),
            JobState::Stopped => formatter.write_str("Stopped"),
            JobState::Done => formatter.write_str("Done"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_jobs_output() {
        assert_eq!(JobState::Running.to_string(), "Running");
        assert_eq!(JobState::Stopped.to_string(), "Stopped");
        assert_eq!(JobState::Done.to_string(), "Done");
    }

    #[test]
    fn round_trips_through_u8() {
        for state in [JobState::Running, JobState::Stopped, JobState::Done] {
            assert_eq!(JobState::from_u8(state as u8), state);
        }
    }
}
