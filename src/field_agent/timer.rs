use tokio_util::sync::CancellationToken;

/// Proof of a scheduled advance. Only the ticket that is still current in
/// its [`StepTimer`] may act when it fires.
#[derive(Debug, Clone)]
pub(crate) struct TimerTicket {
    id: u64,
    token: CancellationToken,
}

impl TimerTicket {
    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// Scheduling handle for the main step sequence. Arming a new timer
/// cancels the previous one, so at most one ticket is ever live.
#[derive(Debug, Default)]
pub(crate) struct StepTimer {
    current: Option<TimerTicket>,
    issued: u64,
}

impl StepTimer {
    pub(crate) fn arm(&mut self) -> TimerTicket {
        self.cancel();
        self.issued += 1;
        let ticket = TimerTicket {
            id: self.issued,
            token: CancellationToken::new(),
        };
        self.current = Some(ticket.clone());
        ticket
    }

    pub(crate) fn cancel(&mut self) {
        if let Some(ticket) = self.current.take() {
            ticket.token.cancel();
        }
    }

    /// Consumes the slot if `ticket` is the live one. Returns `false` for a
    /// superseded or cancelled ticket, which must then do nothing.
    pub(crate) fn fire(&mut self, ticket: &TimerTicket) -> bool {
        let live = self
            .current
            .as_ref()
            .is_some_and(|current| current.id == ticket.id && !current.token.is_cancelled());
        if live {
            self.current = None;
        }
        live
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.current.is_some()
    }
}
