// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Request and response transforms.
//!
//! | transform                  | leg      | effect                                        |
//! |----------------------------|----------|-----------------------------------------------|
//! | [`build_outbound_headers`] | request  | `Host` = upstream, `Referer` = upstream URL   |
//! | [`build_response_headers`] | response | CORS open, CSP dropped, optional `no-store`   |
//! | [`maybe_rewrite`]          | response | UTF-8 HTML bodies run through `proxy.rewrite` |

mod headers;
mod rewrite;


pub use headers::{STRIPPED_RESPONSE_HEADERS, build_outbound_headers, build_response_headers};
pub use rewrite::{
    CUSTOM_DOMAIN_PLACEHOLDER, RewriteRule, UPSTREAM_PLACEHOLDER, is_rewritable, materialize,
    maybe_rewrite, rewrite_text,
};
