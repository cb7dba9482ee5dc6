//! The streaming reader and writer protocols every format codec satisfies.
//!
//! Codecs implement a small set of parsing/emitting primitives; the
//! protocol itself — batch retrieval, single-peak streaming with one unit
//! of lookahead, list-boundary bookkeeping, close semantics — lives in the
//! provided methods here and in the [`ListCursor`]/[`WriterCursor`] state
//! that every codec composes. Keeping the lookahead buffer in one place
//! means no codec can reintroduce the classic off-by-one where a
//! `has_next` probe swallows the first peak of the following list.

use std::mem;

use indexmap::IndexMap;

use super::PeakIoError;
use crate::peaks::{Peak, PeakList};

/// Where a reader's cursor sits between calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CursorState {
    /// Nothing has been consumed from the stream yet.
    #[default]
    BeforeFirstList,
    /// A list header has been consumed and none of its peaks returned.
    AtListStart,
    /// At least one peak of the current list has been returned.
    WithinList,
    /// The stream is drained. Terminal.
    Exhausted,
    /// `close` was called. Terminal.
    Closed,
}

/// The parent-ion metadata introducing one peak list.
#[derive(Debug, Default, Clone)]
pub struct ListHeader {
    pub precursor: Option<Peak>,
    pub tandem_level: Option<u8>,
    pub params: IndexMap<String, String>,
}

impl ListHeader {
    pub fn tandem(precursor: Peak, tandem_level: u8) -> ListHeader {
        ListHeader {
            precursor: Some(precursor),
            tandem_level: Some(tandem_level),
            params: IndexMap::new(),
        }
    }
}

/// Streaming state shared by every reader: the current list's header, the
/// single peak of lookahead, and the position in the list/stream
/// lifecycle. Codecs own one of these and hand out references.
#[derive(Debug, Default)]
pub struct ListCursor {
    state: CursorState,
    pending: Option<Peak>,
    header: ListHeader,
    source_name: String,
}

impl ListCursor {
    pub fn new<S: Into<String>>(source_name: S) -> ListCursor {
        ListCursor {
            source_name: source_name.into(),
            ..Default::default()
        }
    }

    #[inline]
    pub fn state(&self) -> CursorState {
        self.state
    }

    #[inline]
    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn header(&self) -> &ListHeader {
        &self.header
    }

    /// Move the cursor onto the header of a freshly parsed list.
    pub fn enter_list(&mut self, header: ListHeader) {
        debug_assert!(self.pending.is_none());
        self.header = header;
        self.state = CursorState::AtListStart;
    }

    pub fn exhaust(&mut self) {
        self.state = CursorState::Exhausted;
    }

    pub fn close(&mut self) {
        self.pending = None;
        self.state = CursorState::Closed;
    }

    fn take_pending(&mut self) -> Option<Peak> {
        self.pending.take()
    }

    fn stash(&mut self, peak: Peak) {
        debug_assert!(self.pending.is_none());
        self.pending = Some(peak);
    }

    /// Start a [`PeakList`] for batch collection, consuming the current
    /// header and any buffered lookahead peak.
    fn begin_collect(&mut self) -> PeakList {
        let header = mem::take(&mut self.header);
        let mut list = PeakList {
            precursor: header.precursor,
            tandem_level: header.tandem_level,
            params: header.params,
            source_name: self.source_name.clone(),
            peaks: Vec::new(),
        };
        if let Some(peak) = self.pending.take() {
            list.push(peak);
        }
        list
    }
}

/// The streaming decoder protocol.
///
/// Implementations supply [`parse_next_header`](PeakListReader::parse_next_header)
/// and [`parse_next_peak`](PeakListReader::parse_next_peak) plus cursor
/// access; everything else is protocol logic that implementors should not
/// override.
///
/// Both consumption modes work over the same instance and may be mixed:
///
/// * **Batch**: call [`next_peak_list`](PeakListReader::next_peak_list)
///   until it yields `Ok(None)`.
/// * **Streaming**: drive [`next_peak`](PeakListReader::next_peak) /
///   [`has_next_peak`](PeakListReader::has_next_peak) and watch
///   [`is_start_of_peak_list`](PeakListReader::is_start_of_peak_list) for
///   list boundaries; `next_peak` yields `Ok(None)` once per boundary
///   crossing, after the cursor has already advanced onto the next list's
///   header.
pub trait PeakListReader {
    fn cursor(&self) -> &ListCursor;

    fn cursor_mut(&mut self) -> &mut ListCursor;

    /// Consume input up to and including the next list's parent-ion
    /// metadata. `Ok(None)` when the stream holds no further list.
    fn parse_next_header(&mut self) -> Result<Option<ListHeader>, PeakIoError>;

    /// Produce the next peak of the current list, or `Ok(None)` once the
    /// list's peaks are finished, leaving the stream positioned before
    /// the next header.
    fn parse_next_peak(&mut self) -> Result<Option<Peak>, PeakIoError>;

    /// Hook for codecs holding resources that want them released at
    /// `close` time rather than at drop time.
    fn release(&mut self) {}

    /// Name of the file or stream this reader consumes.
    fn source_name(&self) -> &str {
        self.cursor().source_name()
    }

    fn check_open(&self) -> Result<(), PeakIoError> {
        if self.cursor().state() == CursorState::Closed {
            Err(PeakIoError::UseAfterClose)
        } else {
            Ok(())
        }
    }

    /// True exactly when the cursor sits on the first peak of a list:
    /// the header has been consumed but no peak of that list returned.
    fn is_start_of_peak_list(&self) -> bool {
        self.cursor().state() == CursorState::AtListStart
    }

    /// The current list's parent ion. Meaningful once
    /// [`is_start_of_peak_list`](PeakListReader::is_start_of_peak_list)
    /// has been true for the list; `None` when the format omits it.
    fn precursor(&self) -> Option<&Peak> {
        self.cursor().header().precursor.as_ref()
    }

    fn tandem_level(&self) -> Option<u8> {
        self.cursor().header().tandem_level
    }

    /// Batch mode: consume one complete list. When called mid-list after
    /// streaming use, the returned list holds the remaining peaks of the
    /// current list. `Ok(None)` signals end of stream and nothing else.
    fn next_peak_list(&mut self) -> Result<Option<PeakList>, PeakIoError> {
        self.check_open()?;
        loop {
            match self.cursor().state() {
                CursorState::Exhausted => return Ok(None),
                CursorState::BeforeFirstList => match self.parse_next_header()? {
                    Some(header) => self.cursor_mut().enter_list(header),
                    None => {
                        self.cursor_mut().exhaust();
                        return Ok(None);
                    }
                },
                CursorState::AtListStart | CursorState::WithinList => {
                    let mut list = self.cursor_mut().begin_collect();
                    while let Some(peak) = self.parse_next_peak()? {
                        list.push(peak);
                    }
                    match self.parse_next_header()? {
                        Some(header) => self.cursor_mut().enter_list(header),
                        None => self.cursor_mut().exhaust(),
                    }
                    return Ok(Some(list));
                }
                CursorState::Closed => return Err(PeakIoError::UseAfterClose),
            }
        }
    }

    /// True iff another peak can be produced without starting a new
    /// logical list. Idempotent: the probed peak is buffered, never lost,
    /// and repeated calls do not advance further.
    fn has_next_peak(&mut self) -> Result<bool, PeakIoError> {
        self.check_open()?;
        loop {
            match self.cursor().state() {
                CursorState::Exhausted => return Ok(false),
                CursorState::BeforeFirstList => match self.parse_next_header()? {
                    Some(header) => self.cursor_mut().enter_list(header),
                    None => {
                        self.cursor_mut().exhaust();
                        return Ok(false);
                    }
                },
                CursorState::AtListStart | CursorState::WithinList => {
                    if self.cursor().pending.is_some() {
                        return Ok(true);
                    }
                    match self.parse_next_peak()? {
                        Some(peak) => {
                            self.cursor_mut().stash(peak);
                            return Ok(true);
                        }
                        None => {
                            match self.parse_next_header()? {
                                Some(header) => self.cursor_mut().enter_list(header),
                                None => self.cursor_mut().exhaust(),
                            }
                            return Ok(false);
                        }
                    }
                }
                CursorState::Closed => return Err(PeakIoError::UseAfterClose),
            }
        }
    }

    /// Streaming mode: the next peak of the current list. `Ok(None)`
    /// marks a list boundary — by the time it is returned the cursor has
    /// advanced onto the next list's header (or exhausted the stream),
    /// so [`precursor`](PeakListReader::precursor) and friends already
    /// describe the upcoming list.
    fn next_peak(&mut self) -> Result<Option<Peak>, PeakIoError> {
        self.check_open()?;
        match self.cursor().state() {
            CursorState::Exhausted => Ok(None),
            CursorState::BeforeFirstList => {
                match self.parse_next_header()? {
                    Some(header) => self.cursor_mut().enter_list(header),
                    None => self.cursor_mut().exhaust(),
                }
                // Boundary signal for the first list; the caller sees
                // `is_start_of_peak_list` flip to true before any peak.
                Ok(None)
            }
            CursorState::AtListStart | CursorState::WithinList => {
                if let Some(peak) = self.cursor_mut().take_pending() {
                    self.cursor_mut().state = CursorState::WithinList;
                    return Ok(Some(peak));
                }
                match self.parse_next_peak()? {
                    Some(peak) => {
                        self.cursor_mut().state = CursorState::WithinList;
                        Ok(Some(peak))
                    }
                    None => {
                        match self.parse_next_header()? {
                            Some(header) => self.cursor_mut().enter_list(header),
                            None => self.cursor_mut().exhaust(),
                        }
                        Ok(None)
                    }
                }
            }
            CursorState::Closed => Err(PeakIoError::UseAfterClose),
        }
    }

    /// Release the reader. Idempotent; any read after the first `close`
    /// fails with [`PeakIoError::UseAfterClose`].
    fn close(&mut self) {
        if self.cursor().state() != CursorState::Closed {
            self.release();
            self.cursor_mut().close();
        }
    }
}

/// Where a writer sits between calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriterState {
    /// No list is open.
    #[default]
    Idle,
    /// A list has been started and not yet terminated.
    InList,
    /// `close` ran; the output is finalized. Terminal.
    Closed,
}

/// Writer-side lifecycle state, composed by every encoder.
#[derive(Debug, Default)]
pub struct WriterCursor {
    state: WriterState,
    target_name: String,
}

impl WriterCursor {
    pub fn new<S: Into<String>>(target_name: S) -> WriterCursor {
        WriterCursor {
            target_name: target_name.into(),
            ..Default::default()
        }
    }

    #[inline]
    pub fn state(&self) -> WriterState {
        self.state
    }

    #[inline]
    pub fn target_name(&self) -> &str {
        &self.target_name
    }
}

/// The streaming encoder protocol.
///
/// Implementations supply [`begin_list`](PeakListWriter::begin_list),
/// [`put_peak`](PeakListWriter::put_peak) and
/// [`finish`](PeakListWriter::finish); batch writing, ordering checks and
/// close-exactly-once semantics are provided here.
pub trait PeakListWriter {
    fn writer_cursor(&self) -> &WriterCursor;

    fn writer_cursor_mut(&mut self) -> &mut WriterCursor;

    /// Reject a list the target format structurally cannot represent.
    /// Runs before any byte of the list is emitted.
    fn check_compatible(&self, _list: &PeakList) -> Result<(), PeakIoError> {
        Ok(())
    }

    /// Emit the header introducing a new list, terminating the previous
    /// list first if the format requires an explicit terminator.
    fn begin_list(&mut self, header: &ListHeader) -> Result<(), PeakIoError>;

    /// Emit one peak of the currently open list.
    fn put_peak(&mut self, peak: &Peak) -> Result<(), PeakIoError>;

    /// Terminate the open list, if any, and flush the output.
    fn finish(&mut self) -> Result<(), PeakIoError>;

    fn target_name(&self) -> &str {
        self.writer_cursor().target_name()
    }

    fn check_writable(&self) -> Result<(), PeakIoError> {
        if self.writer_cursor().state() == WriterState::Closed {
            Err(PeakIoError::UseAfterClose)
        } else {
            Ok(())
        }
    }

    /// Streaming mode: open a new list. Any previously open list is
    /// terminated as a side effect.
    fn start_peak_list(
        &mut self,
        precursor: Option<&Peak>,
        tandem_level: Option<u8>,
    ) -> Result<(), PeakIoError> {
        self.check_writable()?;
        let header = ListHeader {
            precursor: precursor.cloned(),
            tandem_level,
            params: IndexMap::new(),
        };
        self.begin_list(&header)?;
        self.writer_cursor_mut().state = WriterState::InList;
        Ok(())
    }

    /// Streaming mode: append a peak to the open list. Calling this
    /// before any [`start_peak_list`](PeakListWriter::start_peak_list) is
    /// a [`PeakIoError::ProtocolViolation`].
    fn write_peak(&mut self, peak: &Peak) -> Result<(), PeakIoError> {
        self.check_writable()?;
        if self.writer_cursor().state() != WriterState::InList {
            return Err(PeakIoError::ProtocolViolation(
                "write_peak called before start_peak_list",
            ));
        }
        self.put_peak(peak)
    }

    /// Batch mode: write one complete list. Shape checks run first; a
    /// rejected list leaves the output untouched.
    fn write(&mut self, list: &PeakList) -> Result<(), PeakIoError> {
        self.check_writable()?;
        self.check_compatible(list)?;
        let header = ListHeader {
            precursor: list.precursor.clone(),
            tandem_level: list.tandem_level,
            params: list.params.clone(),
        };
        self.begin_list(&header)?;
        self.writer_cursor_mut().state = WriterState::InList;
        for peak in list.iter() {
            self.put_peak(peak)?;
        }
        Ok(())
    }

    /// Terminate every started list exactly once and flush. A second
    /// `close` is a no-op.
    fn close(&mut self) -> Result<(), PeakIoError> {
        if self.writer_cursor().state() == WriterState::Closed {
            return Ok(());
        }
        self.finish()?;
        self.writer_cursor_mut().state = WriterState::Closed;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    /// A reader over a canned sequence of lists, for exercising the
    /// protocol logic without any real format in play.
    struct CannedReader {
        cursor: ListCursor,
        lists: Vec<(ListHeader, Vec<Peak>)>,
        next_list: usize,
        next_peak: usize,
    }

    impl CannedReader {
        fn new(lists: Vec<(ListHeader, Vec<Peak>)>) -> CannedReader {
            CannedReader {
                cursor: ListCursor::new("canned"),
                lists,
                next_list: 0,
                next_peak: 0,
            }
        }
    }

    impl PeakListReader for CannedReader {
        fn cursor(&self) -> &ListCursor {
            &self.cursor
        }

        fn cursor_mut(&mut self) -> &mut ListCursor {
            &mut self.cursor
        }

        fn parse_next_header(&mut self) -> Result<Option<ListHeader>, PeakIoError> {
            if self.next_list >= self.lists.len() {
                return Ok(None);
            }
            let header = self.lists[self.next_list].0.clone();
            self.next_list += 1;
            self.next_peak = 0;
            Ok(Some(header))
        }

        fn parse_next_peak(&mut self) -> Result<Option<Peak>, PeakIoError> {
            let peaks = &self.lists[self.next_list - 1].1;
            if self.next_peak >= peaks.len() {
                return Ok(None);
            }
            let peak = peaks[self.next_peak].clone();
            self.next_peak += 1;
            Ok(Some(peak))
        }
    }

    fn two_lists() -> CannedReader {
        CannedReader::new(vec![
            (
                ListHeader::tandem(Peak::with_charge(500.0, 10.0, 2).unwrap(), 2),
                vec![Peak::with_intensity(100.0, 1.0).unwrap()],
            ),
            (
                ListHeader::tandem(Peak::with_charge(600.0, 20.0, 3).unwrap(), 2),
                vec![
                    Peak::with_intensity(200.0, 2.0).unwrap(),
                    Peak::with_intensity(300.0, 3.0).unwrap(),
                ],
            ),
        ])
    }

    #[test]
    fn test_batch_mode() {
        let mut reader = two_lists();
        let first = reader.next_peak_list().unwrap().unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first.precursor.as_ref().unwrap().mz(), 500.0);
        let second = reader.next_peak_list().unwrap().unwrap();
        assert_eq!(second.len(), 2);
        assert!(reader.next_peak_list().unwrap().is_none());
        assert!(reader.next_peak_list().unwrap().is_none());
    }

    #[test]
    fn test_streaming_boundaries() {
        let mut reader = two_lists();
        assert!(!reader.is_start_of_peak_list());
        // First boundary crossing.
        assert!(reader.next_peak().unwrap().is_none());
        assert!(reader.is_start_of_peak_list());
        assert_eq!(reader.precursor().unwrap().mz(), 500.0);

        let p = reader.next_peak().unwrap().unwrap();
        assert_eq!(p.mz(), 100.0);
        assert!(!reader.is_start_of_peak_list());

        // Crossing into list two.
        assert!(reader.next_peak().unwrap().is_none());
        assert!(reader.is_start_of_peak_list());
        assert_eq!(reader.precursor().unwrap().mz(), 600.0);

        assert_eq!(reader.next_peak().unwrap().unwrap().mz(), 200.0);
        assert_eq!(reader.next_peak().unwrap().unwrap().mz(), 300.0);
        assert!(reader.next_peak().unwrap().is_none());
        assert!(!reader.is_start_of_peak_list());
        assert!(reader.next_peak().unwrap().is_none());
    }

    /// Interleaving lookahead probes anywhere in the call sequence never
    /// skips or duplicates a peak.
    #[test]
    fn test_lookahead_never_drops_a_peak() {
        let mut reader = two_lists();
        assert!(reader.has_next_peak().unwrap());
        assert!(reader.has_next_peak().unwrap());
        assert!(reader.is_start_of_peak_list());
        assert_eq!(reader.precursor().unwrap().mz(), 500.0);

        let p = reader.next_peak().unwrap().unwrap();
        assert_eq!(p.mz(), 100.0);

        // The probe that discovers the end of list one must land the
        // cursor on list two's header.
        assert!(!reader.has_next_peak().unwrap());
        assert!(reader.is_start_of_peak_list());
        assert_eq!(reader.precursor().unwrap().mz(), 600.0);

        assert!(reader.has_next_peak().unwrap());
        assert_eq!(reader.next_peak().unwrap().unwrap().mz(), 200.0);
        assert_eq!(reader.next_peak().unwrap().unwrap().mz(), 300.0);
        assert!(!reader.has_next_peak().unwrap());
        assert!(!reader.has_next_peak().unwrap());
    }

    /// Peaks consumed by streaming calls are not replayed by a
    /// subsequent batch call; the batch call returns the remainder.
    #[test]
    fn test_mixed_modes() {
        let mut reader = two_lists();
        assert!(reader.next_peak().unwrap().is_none());
        assert_eq!(reader.next_peak().unwrap().unwrap().mz(), 100.0);
        assert!(reader.next_peak().unwrap().is_none());
        assert_eq!(reader.next_peak().unwrap().unwrap().mz(), 200.0);
        let rest = reader.next_peak_list().unwrap().unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest.peaks[0].mz(), 300.0);
        assert!(reader.next_peak_list().unwrap().is_none());
    }

    #[test]
    fn test_close_idempotent() {
        let mut reader = two_lists();
        reader.close();
        reader.close();
        assert!(matches!(
            reader.next_peak_list(),
            Err(PeakIoError::UseAfterClose)
        ));
        assert!(matches!(reader.next_peak(), Err(PeakIoError::UseAfterClose)));
    }

    /// Streaming/batch equivalence on the canned source: grouping peaks
    /// between boundaries reproduces the batch lists.
    #[test]
    fn test_streaming_batch_equivalence() {
        let mut batch = two_lists();
        let mut expected = Vec::new();
        while let Some(list) = batch.next_peak_list().unwrap() {
            expected.push(list);
        }

        let mut streaming = two_lists();
        let mut rebuilt: Vec<PeakList> = Vec::new();
        loop {
            if streaming.is_start_of_peak_list() {
                let mut list = PeakList::new();
                list.precursor = streaming.precursor().cloned();
                list.tandem_level = streaming.tandem_level();
                rebuilt.push(list);
            }
            match streaming.next_peak().unwrap() {
                Some(peak) => rebuilt
                    .last_mut()
                    .expect("peak before any list boundary")
                    .push(peak),
                None => {
                    if !streaming.is_start_of_peak_list() {
                        break;
                    }
                }
            }
        }

        assert_eq!(expected.len(), rebuilt.len());
        for (a, b) in expected.iter().zip(rebuilt.iter()) {
            assert!(a.approx_eq(b, 1e-9));
        }
    }
}
