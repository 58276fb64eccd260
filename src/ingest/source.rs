use anyhow::Result;

use crate::frame::Frame;

/// A live frame transport.
///
/// `open` establishes the connection, `read` blocks for the next decoded
/// frame and `release` tears the connection down. After a failed `read` the
/// caller releases and reopens; implementations need not recover in place.
pub trait FrameSource: Send {
    /// Address or name of the source, for logs.
    fn describe(&self) -> String;

    fn open(&mut self) -> Result<()>;

    fn read(&mut self) -> Result<Frame>;

    fn release(&mut self);

    fn is_open(&self) -> bool;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn describe(&self) -> String {
        (**self).describe()
    }

    fn open(&mut self) -> Result<()> {
        (**self).open()
    }

    fn read(&mut self) -> Result<Frame> {
        (**self).read()
    }

    fn release(&mut self) {
        (**self).release()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }
}
