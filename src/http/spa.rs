// Copyright 2025 Europa Software
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Dynamic-page (SPA) support.
//!
//! In dynamic mode a page request is not answered with the page itself.
//! The first request gets a minimal bootstrap document whose script runs in
//! the browser, refetches the same URI with an `X-Requested-With: SPA`
//! header, and swaps the returned `<main>` fragment into the live document.
//! Requests carrying that header get the real page transformed: the
//! `<body>` element, attributes included, is rewritten as a `<main>`
//! fragment the bootstrap script consumes. Link clicks and history
//! navigation are intercepted client-side so the page never fully reloads.

use tracing::error;

/// Marker header name sent by every fetch the bootstrap script issues.
pub(crate) const SPA_MARKER_HEADER: &str = "X-Requested-With";

/// Marker header value.
pub(crate) const SPA_MARKER_VALUE: &str = "SPA";

/// Placeholder the bootstrap script template carries for the original URI.
const ORIGINAL_URI_PLACEHOLDER: &str = "_ES_ORIGINAL_URI_";

/// The empty skeleton document the bootstrap scripts are injected into.
fn make_blank_page() -> String {
    "<!DOCTYPE html>\n<html> <head></head> <body> <main></main> </body> </html>\n".to_string()
}

/// Script warning the user when first hydration takes suspiciously long.
fn make_load_warning_script() -> &'static str {
    r#"
<script name="es-loadtime">
// Provide a load time warning message
function addBodyElement(htmlString)
{
    var fragment = document.createDocumentFragment();
    var elem = document.createElement('div');
    elem.innerHTML = htmlString;
    while (elem.firstChild)
        fragment.appendChild(elem.firstChild);
    document.body.insertBefore(fragment, document.body.childNodes[0]);
}

var firstHydrationDone = false;

function firstHydrationWaitTimeout()
{
    if (!firstHydrationDone)
        addBodyElement("<p style='font-size: calc(16px + 0.2vw);'>It is taking longer than expected to load the page</p>");
}
setTimeout(firstHydrationWaitTimeout, 8000)
</script>
"#
}

/// The client-side loader: fetches page content with the SPA marker,
/// swaps `<main>`, keeps title and history in sync, and intercepts
/// same-origin link clicks and back/forward navigation.
fn make_bootstrap_script(original_uri: &str) -> String {
    let template = r#"
<script name="es-bootstrap-dynamic">
(function ()
{
    // Load the current page content dynamically
    function loadPage(path, replace = false)
    {
        // Fetch the page, indicating to the server that the request is for SPA
        fetch(path, { headers: { 'X-Requested-With': 'SPA' }})
        .then(res => res.text())
        .then(html =>
            {
                const parser = new DOMParser();
                const doc = parser.parseFromString(html, 'text/html');
                const newMain = doc.querySelector('main');
                const currentMain = document.querySelector('main');

                if (newMain && currentMain)
                    currentMain.innerHTML = newMain.innerHTML;

                // Optionally update the document title
                const newTitle = doc.querySelector('title');
                if (newTitle) document.title = newTitle.innerText;

                if (!replace)
                    history.pushState(null, '', path);

                firstHydrationDone = true;
            })
            .catch(err => console.error('page load error:', err));
    }

    // Intercept link clicks
    document.addEventListener('click', function (e)
    {
        const link = e.target.closest('a');
        if (!link) return;

        const url = new URL(link.href);

        // Only intercept same-origin navigation
        if (url.origin !== location.origin) return;

        // Allow new tab, download, etc.
        if (link.target === '_blank' || link.hasAttribute('download') || e.ctrlKey || e.metaKey || e.shiftKey) return;

        e.preventDefault();
        if (url.pathname !== location.pathname)
            loadPage(url.pathname);
    });

    // Handle back/forward buttons
    window.addEventListener('popstate', function ()
    {
        loadPage(location.pathname, true);
    });

    // Request the initial document again as hydration data
    loadPage("_ES_ORIGINAL_URI_", true)
})();
</script>
"#;
    template.replace(ORIGINAL_URI_PLACEHOLDER, original_uri)
}

/// Inserts `element` right after the document's `<head>` opening tag.
fn inject_into_head(document: &mut String, element: &str) -> bool {
    const HEAD_OPENING_TAG: &str = "<head>";
    let Some(head_index) = document.find(HEAD_OPENING_TAG) else {
        return false;
    };
    document.insert_str(head_index + HEAD_OPENING_TAG.len(), element);
    true
}

/// The full bootstrap document answered to a dynamic-page request without
/// the SPA marker.
pub(crate) fn make_bootstrap_page(original_uri: &str) -> String {
    let mut page = make_blank_page();
    inject_into_head(&mut page, make_load_warning_script());
    inject_into_head(&mut page, &make_bootstrap_script(original_uri));
    page
}

/// Rewrites a page's `<body>` element as the `<main>` fragment the
/// bootstrap script consumes, carrying the body's attributes over. `None`
/// when the document has no usable body element; the caller serves the
/// page untransformed.
pub(crate) fn make_dynamic_fragment(html: &str, uri: &str) -> Option<String> {
    let body_open = html.find("<body")?;
    let attrs_end = body_open + html[body_open..].find('>')?;
    let attrs = &html[body_open + "<body".len()..attrs_end];
    let content_start = attrs_end + 1;
    let body_close = content_start
        + match html[content_start..].find("</body>") {
            Some(i) => i,
            None => {
                error!(uri, "page has no closing body tag, serving it untransformed");
                return None;
            }
        };
    let content = &html[content_start..body_close];
    Some(format!("<main{attrs}>{content}</main>"))
}
