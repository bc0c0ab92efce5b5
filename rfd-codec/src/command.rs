//! # Commands
//!
//! A command is the ordered argument list sent as one request frame. The
//! first argument is the operation name; arguments keep their given order.

use bytes::Bytes;

/// Conversion from a scalar into one binary-safe command argument.
///
/// Implemented for text, byte buffers, integers and floats so that mixed
/// argument lists like `["zadd", "zset:1", 1, "a"]` can be expressed with
/// the [`cmd!`](crate::cmd) macro.
pub trait ToArg {
    /// Returns the argument bytes.
    fn to_arg(&self) -> Bytes;
}

impl ToArg for str {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}

impl ToArg for String {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}

impl ToArg for [u8] {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self)
    }
}

impl<const N: usize> ToArg for [u8; N] {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self)
    }
}

impl ToArg for Vec<u8> {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self)
    }
}

impl ToArg for Bytes {
    fn to_arg(&self) -> Bytes {
        // Refcount bump, no copy.
        self.clone()
    }
}

impl<T: ToArg + ?Sized> ToArg for &T {
    fn to_arg(&self) -> Bytes {
        (**self).to_arg()
    }
}

macro_rules! impl_to_arg_display {
    ($($ty:ty),* $(,)?) => {
        $(
            impl ToArg for $ty {
                fn to_arg(&self) -> Bytes {
                    Bytes::from(self.to_string())
                }
            }
        )*
    };
}

impl_to_arg_display!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64);

/// Ordered argument list for one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Command {
    args: Vec<Bytes>,
}

impl Command {
    /// Starts a command with its operation name.
    pub fn new(name: impl ToArg) -> Self {
        Command {
            args: vec![name.to_arg()],
        }
    }

    /// Creates a command with no arguments; push arguments before encoding.
    pub fn empty() -> Self {
        Command { args: Vec::new() }
    }

    /// Builds a command from a homogeneous argument list.
    pub fn from_args<I, A>(args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: ToArg,
    {
        Command {
            args: args.into_iter().map(|arg| arg.to_arg()).collect(),
        }
    }

    /// Appends an argument, builder style.
    pub fn arg(mut self, arg: impl ToArg) -> Self {
        self.args.push(arg.to_arg());
        self
    }

    /// Appends an argument in place.
    pub fn push_arg(&mut self, arg: impl ToArg) {
        self.args.push(arg.to_arg());
    }

    /// Operation name, if any argument is present.
    pub fn name(&self) -> Option<&[u8]> {
        self.args.first().map(|arg| arg.as_ref())
    }

    /// All arguments in order, name first.
    pub fn args(&self) -> &[Bytes] {
        &self.args
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Returns true when the operation name equals `name`, ignoring ASCII case.
    pub fn is(&self, name: &str) -> bool {
        self.name()
            .map(|own| own.eq_ignore_ascii_case(name.as_bytes()))
            .unwrap_or(false)
    }
}

/// Builds a [`Command`] from mixed scalar arguments.
///
/// ```
/// use rfd_codec::cmd;
///
/// let command = cmd!["zadd", "zset:1", 1, "a", 2.5, "b"];
/// assert_eq!(command.len(), 6);
/// ```
#[macro_export]
macro_rules! cmd {
    ($($arg:expr),+ $(,)?) => {{
        let mut command = $crate::Command::empty();
        $( command.push_arg(&$arg); )+
        command
    }};
}
